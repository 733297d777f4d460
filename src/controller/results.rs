//! Accumulates the outcome of a reconcile pass that keeps going after errors

use std::time::Duration;

use crate::error::{Error, Result};

/// Collects a pass's requeue request and the first error it hit
#[derive(Debug, Default)]
pub struct ResultBuilder {
    requeue_after: Option<Duration>,
    error: Option<Error>,
}

impl ResultBuilder {
    /// Ask to run again after `delay`; the shortest request wins
    pub fn requeue_after(&mut self, delay: Duration) -> &mut Self {
        self.requeue_after = Some(match self.requeue_after {
            Some(current) => current.min(delay),
            None => delay,
        });
        self
    }

    /// Record an error without stopping the pass; the first one is kept
    pub fn error(&mut self, error: Error) -> &mut Self {
        if self.error.is_none() {
            self.error = Some(error);
        }
        self
    }

    /// The recorded error if any, otherwise the requested requeue delay
    pub fn result(self) -> Result<Option<Duration>> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.requeue_after),
        }
    }
}
