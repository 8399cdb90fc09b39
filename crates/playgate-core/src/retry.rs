//! Retry policy for failed authorization calls
//!
//! Two independent bounded budgets:
//! - gateway failures (HTTP 502/504) retry the same startPlayback call
//! - mak rejections (service status 301/519) retry the whole sequence from
//!   startup, after the caller invalidates the cached credentials
//!
//! Anything else is irrecoverable from the client's perspective.

use crate::Error;

/// Countdown armed lazily on the first failure of its class.
///
/// Carried across retries of the same authorize() call and never reset
/// mid-call.
#[derive(Debug, Clone, Copy)]
pub struct Countdown {
    max: u32,
    remaining: Option<u32>,
}

impl Countdown {
    pub fn new(max: u32) -> Self {
        Self { max, remaining: None }
    }

    /// Consumes one retry; returns false once the budget is exhausted
    pub fn try_consume(&mut self) -> bool {
        let remaining = self.remaining.unwrap_or(self.max);
        if remaining == 0 {
            return false;
        }
        self.remaining = Some(remaining - 1);
        true
    }

    /// How many retries have been consumed so far
    pub fn spent(&self) -> u32 {
        self.remaining.map_or(0, |r| self.max - r)
    }

    pub fn remaining(&self) -> u32 {
        self.remaining.unwrap_or(self.max)
    }
}

/// The two per-attempt retry budgets, independent of each other
#[derive(Debug)]
pub struct RetryBudget {
    pub gateway: Countdown,
    pub mak: Countdown,
}

impl RetryBudget {
    pub fn new(max_gateway: u32, max_mak: u32) -> Self {
        Self {
            gateway: Countdown::new(max_gateway),
            mak: Countdown::new(max_mak),
        }
    }
}

/// What the orchestrator should do after a startPlayback failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-issue the same startPlayback call
    RetryStartPlayback,
    /// Invalidate cached credentials and redo the sequence from startup
    RetryFromStartup,
    /// Surface the original error to the caller
    Fail,
}

/// Pure decision function over a failure and the remaining budgets
pub fn decide(error: &Error, budget: &mut RetryBudget) -> RetryDecision {
    if error.is_gateway() && budget.gateway.try_consume() {
        return RetryDecision::RetryStartPlayback;
    }
    if error.is_mak_rejected() && budget.mak.try_consume() {
        return RetryDecision::RetryFromStartup;
    }
    RetryDecision::Fail
}
