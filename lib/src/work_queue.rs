// Copyright 2020 The Jujutsu Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Component J: a bounded-concurrency, fail-fast, order-preserving parallel
//! runner, the primitive every cross-repo fan-out (child opens, fetches,
//! pushes, status collection) in this crate runs through.

use std::future::Future;

use futures::stream::FuturesUnordered;
use futures::StreamExt;

/// Runs `worker` over `inputs` with at most `limit` futures in flight at
/// once (`None` means unbounded — one future per input). Returns results in
/// input order. On the first error, no new worker is started; futures
/// already in flight are allowed to finish (their results, if `Ok`, are
/// simply discarded) before the first error is returned.
pub async fn run<I, T, E, F, Fut>(inputs: Vec<I>, limit: Option<usize>, worker: F) -> Result<Vec<T>, E>
where
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let total = inputs.len();
    let limit = limit.unwrap_or(total).clamp(1, total.max(1));

    let mut results: Vec<Option<T>> = (0..total).map(|_| None).collect();
    let mut remaining = inputs.into_iter().enumerate();
    let mut pending = FuturesUnordered::new();

    for _ in 0..limit {
        match remaining.next() {
            Some((i, input)) => pending.push(run_one(i, &worker, input)),
            None => break,
        }
    }

    let mut first_error = None;
    while let Some((i, result)) = pending.next().await {
        match result {
            Ok(value) => {
                results[i] = Some(value);
                if first_error.is_none() {
                    if let Some((next_i, next_input)) = remaining.next() {
                        pending.push(run_one(next_i, &worker, next_input));
                    }
                }
            }
            Err(err) => {
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(results.into_iter().map(|r| r.expect("every slot filled when no error occurred")).collect()),
    }
}

async fn run_one<I, T, E, F, Fut>(index: usize, worker: &F, input: I) -> (usize, Result<T, E>)
where
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    (index, worker(input).await)
}
