//! Engine Commands Module
//!
//! 호출자(CLI, 데스크톱 셸)가 사용하는 명령 정의. 인자는 camelCase JSON으로 역직렬화되고,
//! 오래 걸리는 작업은 blocking 워커에서 실행되어 진행률을 콜백으로 보고합니다.

pub mod apply;
pub mod duplicates;
pub mod source;

use std::sync::{Arc, Mutex, MutexGuard};

use crate::engine::Engine;
use crate::error::{CommandError, CommandResult};
use crate::progress::ProgressReporter;

/// 명령 간에 공유되는 엔진 상태
#[derive(Clone)]
pub struct EngineState(pub Arc<Mutex<Engine>>);

impl EngineState {
    pub fn new(engine: Engine) -> Self {
        Self(Arc::new(Mutex::new(engine)))
    }
}

/// 워커에 넘기는 진행률 수신자
pub type SharedProgress = Arc<dyn ProgressReporter>;

fn lock_engine(state: &EngineState) -> CommandResult<MutexGuard<'_, Engine>> {
    state.0.lock().map_err(|e| CommandError {
        code: "LOCK_ERROR".to_string(),
        message: format!("Failed to acquire engine lock: {}", e),
        details: None,
    })
}

/// 엔진 작업을 blocking 워커에서 실행합니다.
async fn run_blocking<T, F>(state: &EngineState, job: F) -> CommandResult<T>
where
    T: Send + 'static,
    F: FnOnce(&mut Engine) -> CommandResult<T> + Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || {
        let mut engine = lock_engine(&state)?;
        job(&mut *engine)
    })
    .await
    .map_err(|e| CommandError {
        code: "TASK_ERROR".to_string(),
        message: format!("Worker task failed: {}", e),
        details: None,
    })?
}
