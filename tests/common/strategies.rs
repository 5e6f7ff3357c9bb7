#![allow(dead_code)]

use proptest::prelude::*;

/// One lifecycle request issued by a property test
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleRequest {
    Init,
    Start,
    Stop,
    Close,
}

/// A request together with whether the hook it reaches should fail
pub fn lifecycle_step_strategy() -> impl Strategy<Value = (LifecycleRequest, bool)> {
    let request = prop_oneof![
        Just(LifecycleRequest::Init),
        Just(LifecycleRequest::Start),
        Just(LifecycleRequest::Stop),
        Just(LifecycleRequest::Close),
    ];
    // failures are rarer than successes so sequences make progress
    (request, prop::bool::weighted(0.2))
}

pub fn lifecycle_script_strategy() -> impl Strategy<Value = Vec<(LifecycleRequest, bool)>> {
    prop::collection::vec(lifecycle_step_strategy(), 1..40)
}
