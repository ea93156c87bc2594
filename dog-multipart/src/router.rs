use tracing::debug;

use crate::{
    BodyTracker, FilterDecision, FilterStage, MultipartError, MultipartPart, MultipartResult,
    PartSource,
};

/// Where the router stands in its pull loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterState {
    AwaitingNextPart,
    Filtering,
    Exhausted,
    Failed,
}

/// Pulls parts from a source and runs each through a gate and the filter
/// stage.
///
/// Every part the router does not hand out is drained before the next pull;
/// a part it does hand out must be settled by the caller before
/// [`Router::next_accepted`] is called again.
pub struct Router<S> {
    source: S,
    stage: FilterStage,
    last: Option<(String, BodyTracker)>,
    state: RouterState,
}

impl<S: PartSource> Router<S> {
    pub fn new(source: S, stage: FilterStage) -> Self {
        Self {
            source,
            stage,
            last: None,
            state: RouterState::AwaitingNextPart,
        }
    }

    pub fn state(&self) -> RouterState {
        self.state
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Next part that passes `gate` and the filter stage.
    ///
    /// `gate` returning `Ok(false)` skips the part, `Err` aborts the
    /// operation. Rejected parts are drained, and so is a part that aborts
    /// the operation before the error is returned.
    pub async fn next_accepted<G>(&mut self, mut gate: G) -> MultipartResult<Option<MultipartPart>>
    where
        G: FnMut(&MultipartPart) -> MultipartResult<bool>,
    {
        loop {
            if matches!(self.state, RouterState::Exhausted | RouterState::Failed) {
                return Ok(None);
            }
            self.require_settled()?;

            let mut part = match self.source.next_part().await {
                Ok(Some(part)) => part,
                Ok(None) => {
                    self.state = RouterState::Exhausted;
                    return Ok(None);
                }
                Err(e) => return Err(self.fail(e)),
            };
            self.state = RouterState::Filtering;

            let wanted = match gate(&part) {
                Ok(wanted) => wanted,
                Err(e) => {
                    discard(&mut part).await;
                    return Err(self.fail(e));
                }
            };

            let decision = if wanted {
                self.stage.decide(&part)
            } else {
                FilterDecision::Reject
            };

            match decision {
                FilterDecision::Accept => {
                    self.last = Some((part.field_name.clone(), part.body.tracker()));
                    self.state = RouterState::AwaitingNextPart;
                    return Ok(Some(part));
                }
                FilterDecision::Reject => {
                    debug!(field = %part.field_name, file = %part.file_name, "Skipping part");
                    if let Err(e) = part.drain().await {
                        return Err(self.fail(e));
                    }
                    self.state = RouterState::AwaitingNextPart;
                }
                FilterDecision::Error(e) => {
                    discard(&mut part).await;
                    return Err(self.fail(MultipartError::filter(e)));
                }
            }
        }
    }

    /// Drain every remaining part until the source is exhausted.
    pub async fn drain_rest(&mut self) -> MultipartResult<()> {
        while self.next_accepted(|_| Ok(false)).await?.is_some() {}
        Ok(())
    }

    fn require_settled(&mut self) -> MultipartResult<()> {
        if let Some((field, tracker)) = &self.last {
            if !tracker.state().is_settled() {
                let err = MultipartError::PartNotConsumed {
                    field: field.clone(),
                };
                return Err(self.fail(err));
            }
        }
        self.last = None;
        Ok(())
    }

    fn fail(&mut self, err: MultipartError) -> MultipartError {
        self.state = RouterState::Failed;
        err
    }
}

/// End a part pulled by a failing operation. A stream that cannot be
/// drained is left destroyed.
async fn discard(part: &mut MultipartPart) {
    if let Err(e) = part.drain().await {
        debug!(field = %part.field_name, error = %e, "Dropped in-flight part");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BodyState, MemoryPartSource, MultipartOptions};

    fn source() -> MemoryPartSource {
        MemoryPartSource::new()
            .file("a", "1.png", "image/png", "one")
            .file("b", "2.png", "image/png", "two")
            .file("a", "3.png", "image/png", "three")
    }

    #[tokio::test]
    async fn gate_skips_and_drains_unwanted_parts() {
        let mut router = Router::new(source(), FilterStage::new());

        let mut first = router.next_accepted(|p| Ok(p.field_name == "a")).await.unwrap().unwrap();
        assert_eq!(first.file_name, "1.png");
        first.drain().await.unwrap();

        let second = router.next_accepted(|p| Ok(p.field_name == "a")).await.unwrap().unwrap();
        assert_eq!(second.file_name, "3.png");
        assert_eq!(router.source().remaining(), 0);
    }

    #[tokio::test]
    async fn unsettled_part_blocks_the_next_pull() {
        let mut router = Router::new(source(), FilterStage::new());

        let _held = router.next_accepted(|_| Ok(true)).await.unwrap().unwrap();
        let err = router.next_accepted(|_| Ok(true)).await.unwrap_err();

        assert!(matches!(err, MultipartError::PartNotConsumed { field } if field == "a"));
        assert_eq!(router.state(), RouterState::Failed);
    }

    #[tokio::test]
    async fn filter_error_ends_the_part_and_fails() {
        let part = MultipartPart::new("a", "1.png", "image/png", crate::PartBody::from_bytes("one".into()));
        let tracker = part.body.tracker();
        let options = MultipartOptions::new()
            .with_file_filter(|_: &MultipartPart| FilterDecision::error("bad file"));
        let mut router = Router::new(MemoryPartSource::new().part(part), FilterStage::from_options(&options));

        let err = router.next_accepted(|_| Ok(true)).await.unwrap_err();
        assert!(matches!(err, MultipartError::FilterRejectedWithError { .. }));
        assert!(tracker.state().is_settled());
        assert_eq!(router.state(), RouterState::Failed);
        assert!(router.next_accepted(|_| Ok(true)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rejected_parts_get_exactly_one_end_signal() {
        let mut trackers = Vec::new();
        let mut source = MemoryPartSource::new();
        for name in ["x.gif", "y.gif"] {
            let part = MultipartPart::new("f", name, "image/gif", crate::PartBody::from_bytes("gif".into()));
            trackers.push(part.body.tracker());
            source = source.part(part);
        }
        let stage = FilterStage::from_options(&MultipartOptions::new().allow_mime_type("image/png"));
        let mut router = Router::new(source, stage);

        assert!(router.next_accepted(|_| Ok(true)).await.unwrap().is_none());
        assert_eq!(router.state(), RouterState::Exhausted);
        for tracker in trackers {
            assert_eq!(tracker.state(), BodyState::Drained);
            assert_eq!(tracker.end_signals(), 1);
        }
    }
}
