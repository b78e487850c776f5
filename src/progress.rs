//! 진행률 보고와 협조적 취소

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{SyncError, SyncResult};

/// 진행률 수신자. `fraction`은 0.0..=1.0
pub trait ProgressReporter: Send + Sync {
    fn report(&self, fraction: f32, message: &str);
}

impl<F> ProgressReporter for F
where
    F: Fn(f32, &str) + Send + Sync,
{
    fn report(&self, fraction: f32, message: &str) {
        self(fraction, message)
    }
}

/// 아무것도 하지 않는 수신자
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _fraction: f32, _message: &str) {}
}

/// 취소 토큰. 파일/시트 경계에서만 확인됩니다.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// 취소되었으면 `Cancelled`
    pub fn check(&self) -> SyncResult<()> {
        if self.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let token = CancelToken::new();
        let worker = token.clone();
        assert!(worker.check().is_ok());
        token.cancel();
        assert!(matches!(worker.check(), Err(SyncError::Cancelled)));
    }

    #[test]
    fn test_closure_reporter() {
        let seen = Mutex::new(Vec::new());
        let reporter = |fraction: f32, message: &str| {
            seen.lock().unwrap().push((fraction, message.to_string()));
        };
        reporter.report(0.5, "half");
        assert_eq!(seen.lock().unwrap().as_slice(), &[(0.5, "half".to_string())]);
    }
}
