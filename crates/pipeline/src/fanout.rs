//! One-to-many expansion stage.
//!
//! A [`FanOutStage`] takes parents off one queue, asks an [`Expand`]
//! implementation for their children, stamps each child with its parent and
//! pushes the children onto the next queue. A parent whose expansion fails is
//! logged and skipped; its siblings are unaffected.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vaccibot_core::{Attribute, Facility, Lineage, Region, ServiceSlot};
use vaccibot_queue::{WorkReceiver, WorkSender};
use vaccibot_source::{DataSource, RateLimitedFetcher, SourceError};

use crate::lifecycle::StageGroup;

/// Fetches the children of a parent record.
#[async_trait::async_trait]
pub trait Expand<P, C>: Send + Sync {
    async fn expand(&self, parent: &P, cancel: &CancellationToken) -> Result<Vec<C>, SourceError>;
}

#[async_trait::async_trait]
impl<S: DataSource> Expand<Region, Facility> for RateLimitedFetcher<S> {
    async fn expand(&self, parent: &Region, cancel: &CancellationToken) -> Result<Vec<Facility>, SourceError> {
        self.facilities(parent, cancel).await
    }
}

#[async_trait::async_trait]
impl<S: DataSource> Expand<Facility, ServiceSlot> for RateLimitedFetcher<S> {
    async fn expand(
        &self,
        parent: &Facility,
        cancel: &CancellationToken,
    ) -> Result<Vec<ServiceSlot>, SourceError> {
        self.service_slots(parent, cancel).await
    }
}

type SkipFn<P> = Arc<dyn Fn(&P) -> bool + Send + Sync>;

/// Expansion stage. Cloning yields another worker on the same queues.
pub struct FanOutStage<P, C, E> {
    name: &'static str,
    expander: Arc<E>,
    input: WorkReceiver<P>,
    output: WorkSender<C>,
    skip: Option<SkipFn<P>>,
}

impl<P, C, E> Clone for FanOutStage<P, C, E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            expander: Arc::clone(&self.expander),
            input: self.input.clone(),
            output: self.output.clone(),
            skip: self.skip.clone(),
        }
    }
}

impl<P, C, E> FanOutStage<P, C, E>
where
    P: Lineage + Send + Sync + 'static,
    C: Attribute<P> + Send + 'static,
    E: Expand<P, C> + 'static,
{
    pub fn new(
        name: &'static str,
        expander: Arc<E>,
        input: WorkReceiver<P>,
        output: WorkSender<C>,
    ) -> Self {
        Self {
            name,
            expander,
            input,
            output,
            skip: None,
        }
    }

    /// Parents for which `skip` returns true are never expanded.
    pub fn skip_parents<F>(mut self, skip: F) -> Self
    where
        F: Fn(&P) -> bool + Send + Sync + 'static,
    {
        self.skip = Some(Arc::new(skip));
        self
    }

    /// Consume every parent until the input is exhausted or `cancel` fires.
    ///
    /// Cancellation is checked before each parent; an expansion already in
    /// flight is interrupted by the fetcher itself.
    pub async fn run(self, cancel: CancellationToken) {
        loop {
            let parent = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = self.input.recv() => match next {
                    Some(parent) => parent,
                    None => break,
                },
            };
            if !self.expand_one(&parent, &cancel).await {
                break;
            }
        }
        debug!(stage = self.name, "fan-out worker stopped");
    }

    /// Returns false when the stage should stop.
    async fn expand_one(&self, parent: &P, cancel: &CancellationToken) -> bool {
        if let Some(skip) = &self.skip {
            if skip(parent) {
                warn!(stage = self.name, lineage = %parent.lineage(), "skipping excluded parent");
                return true;
            }
        }

        let children = match self.expander.expand(parent, cancel).await {
            Ok(children) => children,
            Err(e) if e.is_cancelled() => return false,
            Err(e) => {
                error!(stage = self.name, lineage = %parent.lineage(), error = %e, "expansion failed");
                return true;
            }
        };

        let count = children.len();
        for mut child in children {
            child.attribute(parent);
            if self.output.send(child).is_err() {
                warn!(stage = self.name, "downstream queue closed");
                return false;
            }
        }
        debug!(stage = self.name, lineage = %parent.lineage(), children = count, "expanded");
        true
    }

    /// Start `workers` copies of this stage in `group`.
    ///
    /// Consumes the stage so that no sender outlives the workers; the output
    /// queue closes when the last worker exits.
    pub fn spawn_into(self, group: &mut StageGroup, workers: usize, cancel: &CancellationToken) {
        info!(stage = self.name, workers, "starting fan-out stage");
        group.spawn_many(self.name, workers, |_| self.clone().run(cancel.clone()));
    }
}
