//! Two-future fan-out for one query.
//!
//! The lexical search and the query embedding start together. If the
//! lexical side finishes first with nothing to rank (or fails) the
//! embedding future is dropped, which cancels it.

use std::future::Future;
use std::time::{Duration, Instant};

pub(crate) struct FanOut<L, E> {
    pub lexical: L,
    pub lexical_elapsed: Duration,
    /// `None` when the embedding was cancelled.
    pub embedding: Option<E>,
    pub embedding_elapsed: Option<Duration>,
}

pub(crate) async fn candidates_and_embedding<T, LE, E, LF, EF>(
    lexical: LF,
    embedding: EF,
) -> FanOut<Result<Vec<T>, LE>, E>
where
    LF: Future<Output = Result<Vec<T>, LE>>,
    EF: Future<Output = E>,
{
    let start = Instant::now();
    tokio::pin!(lexical);
    tokio::pin!(embedding);

    tokio::select! {
        candidates = &mut lexical => {
            let lexical_elapsed = start.elapsed();
            let nothing_to_rank = candidates.as_ref().map(|c| c.is_empty()).unwrap_or(true);
            if nothing_to_rank {
                return FanOut {
                    lexical: candidates,
                    lexical_elapsed,
                    embedding: None,
                    embedding_elapsed: None,
                };
            }
            let vector = embedding.await;
            FanOut {
                lexical: candidates,
                lexical_elapsed,
                embedding: Some(vector),
                embedding_elapsed: Some(start.elapsed()),
            }
        }
        vector = &mut embedding => {
            let embedding_elapsed = start.elapsed();
            let candidates = lexical.await;
            FanOut {
                lexical: candidates,
                lexical_elapsed: start.elapsed(),
                embedding: Some(vector),
                embedding_elapsed: Some(embedding_elapsed),
            }
        }
    }
}
