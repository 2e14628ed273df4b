//! Combining cancellation tokens from independent owners.

use tokio_util::sync::{CancellationToken, DropGuard};

/// A token cancelled when either of its two sources is.
///
/// Cancellation of `parent` propagates through the token tree; `other` is
/// bridged by a small task that lives until this value is dropped.
pub(crate) struct LinkedToken {
    token: CancellationToken,
    _bridge: Option<DropGuard>,
}

impl LinkedToken {
    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Must be called inside a tokio runtime.
pub(crate) fn link(parent: &CancellationToken, other: &CancellationToken) -> LinkedToken {
    let token = parent.child_token();
    if other.is_cancelled() {
        token.cancel();
        return LinkedToken {
            token,
            _bridge: None,
        };
    }
    let done = CancellationToken::new();
    let (child, other, finished) = (token.clone(), other.clone(), done.clone());
    tokio::spawn(async move {
        tokio::select! {
            _ = other.cancelled() => child.cancel(),
            _ = child.cancelled() => {}
            _ = finished.cancelled() => {}
        }
    });
    LinkedToken {
        token,
        _bridge: Some(done.drop_guard()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn either_source_cancels() {
        let a = CancellationToken::new();
        let b = CancellationToken::new();
        let linked = link(&a, &b);
        b.cancel();
        tokio::time::timeout(Duration::from_secs(1), linked.token().cancelled())
            .await
            .unwrap();

        let a = CancellationToken::new();
        let linked = link(&a, &CancellationToken::new());
        a.cancel();
        assert!(linked.token().is_cancelled());
    }

    #[tokio::test]
    async fn already_cancelled_source() {
        let other = CancellationToken::new();
        other.cancel();
        let linked = link(&CancellationToken::new(), &other);
        assert!(linked.token().is_cancelled());
    }
}
