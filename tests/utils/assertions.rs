//! Test assertion helpers - fluent API for verifying test expectations
#![allow(dead_code)] // Test utilities may not all be used in every test

use std::time::Duration;
use tokio::time::timeout;

use super::setup::TestSetup;

const RECEIVE_TIMEOUT: Duration = Duration::from_secs(1);
const SILENCE_WINDOW: Duration = Duration::from_millis(50);

// ============================================================================
// Assertion Helpers
// ============================================================================

pub struct ViewerAssertion<'a> {
    setup: &'a mut TestSetup,
    viewers: Vec<String>,
}

impl<'a> ViewerAssertion<'a> {
    /// Create an assertion for every viewer registered in `room_id`
    pub fn for_room(setup: &'a mut TestSetup, room_id: &str) -> Self {
        let viewers = setup.viewers_in(room_id);
        assert!(!viewers.is_empty(), "room {} has no viewers", room_id);
        Self { setup, viewers }
    }

    /// Create an assertion for specific viewers
    pub fn for_viewers(setup: &'a mut TestSetup, viewers: &[&str]) -> Self {
        let viewers = viewers.iter().map(|s| s.to_string()).collect();
        Self { setup, viewers }
    }

    /// Assert each viewer's next message is `expected` (consumes it)
    pub async fn received(self, expected: &str) {
        self.received_in_order(&[expected]).await;
    }

    /// Assert each viewer's next messages are exactly `expected`, in order
    pub async fn received_in_order(self, expected: &[&str]) {
        for name in &self.viewers {
            let viewer = self.setup.viewer_mut(name);
            for (index, want) in expected.iter().enumerate() {
                let message = timeout(RECEIVE_TIMEOUT, viewer.receiver.recv())
                    .await
                    .unwrap_or_else(|_| {
                        panic!("{} timed out waiting for message {}", name, index)
                    });
                assert_eq!(
                    message.as_deref(),
                    Some(*want),
                    "{} received wrong message at position {}",
                    name,
                    index
                );
            }
        }
    }

    /// Assert no viewer receives anything within a short window
    pub async fn received_nothing(self) {
        tokio::time::sleep(SILENCE_WINDOW).await;

        for name in &self.viewers {
            let viewer = self.setup.viewer_mut(name);
            let message = viewer.receiver.try_recv().ok();
            assert!(
                message.is_none(),
                "{} should not have received {:?}",
                name,
                message
            );
        }
    }
}
