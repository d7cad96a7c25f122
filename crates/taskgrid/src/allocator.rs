use crate::category::{AllocationMode, CategorySpec};
use crate::resources::{PartialResources, ResourceAmount, ResourceKind, ResourceVector};

/// Resource consumption observed for finished tasks of one category.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UsageHistory {
    samples: u64,
    peak: ResourceVector,
    last: Option<ResourceVector>,
}

impl UsageHistory {
    pub fn record(&mut self, usage: &ResourceVector) {
        self.samples += 1;
        self.peak = self.peak.max_by_dim(usage);
        self.last = Some(*usage);
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn is_empty(&self) -> bool {
        self.samples == 0
    }

    /// Elementwise maximum over all recorded samples.
    pub fn peak(&self) -> &ResourceVector {
        &self.peak
    }

    pub fn last(&self) -> Option<&ResourceVector> {
        self.last.as_ref()
    }
}

/// Refinement of MIN_WASTE allocations from observed usage.
///
/// Returning `None` falls back to the first allocation of the category
/// (its first guess, or the whole worker).
pub trait MinWasteStrategy: Send + Sync {
    fn refine(
        &self,
        spec: &CategorySpec,
        capacity: &ResourceVector,
        history: &UsageHistory,
    ) -> Option<ResourceVector>;
}

/// Never refines; every allocation is the first allocation.
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstGuessStrategy;

impl MinWasteStrategy for FirstGuessStrategy {
    fn refine(
        &self,
        _spec: &CategorySpec,
        _capacity: &ResourceVector,
        _history: &UsageHistory,
    ) -> Option<ResourceVector> {
        None
    }
}

/// How an allocation was derived, for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocationBasis {
    /// Max envelope was empty (or all zero), the whole worker is used.
    WholeWorker,
    /// Some dimensions were pinned, unpinned ones got `capacity / slots`.
    Slots {
        slots: u64,
        pinned: Vec<ResourceKind>,
    },
    /// MIN_WASTE category returned its first guess verbatim.
    FirstGuess,
    /// MIN_WASTE strategy produced a refinement from usage history.
    Refined,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationExplanation {
    pub allocation: ResourceVector,
    pub basis: AllocationBasis,
    /// Dimensions raised by the min envelope.
    pub floored: Vec<ResourceKind>,
}

impl std::fmt::Display for AllocationExplanation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.basis {
            AllocationBasis::WholeWorker => write!(f, "whole worker")?,
            AllocationBasis::Slots { slots, pinned } => {
                let pinned: Vec<&str> = pinned.iter().map(|k| k.name()).collect();
                write!(f, "pinned [{}], {} slot(s) per worker", pinned.join(", "), slots)?
            }
            AllocationBasis::FirstGuess => write!(f, "first allocation guess")?,
            AllocationBasis::Refined => write!(f, "refined from usage history")?,
        }
        if !self.floored.is_empty() {
            let floored: Vec<&str> = self.floored.iter().map(|k| k.name()).collect();
            write!(f, "; raised to minimum: {}", floored.join(", "))?;
        }
        Ok(())
    }
}

pub struct Allocator {
    strategy: Box<dyn MinWasteStrategy>,
}

impl Default for Allocator {
    fn default() -> Self {
        Self::new(Box::new(FirstGuessStrategy))
    }
}

impl Allocator {
    pub fn new(strategy: Box<dyn MinWasteStrategy>) -> Self {
        Allocator { strategy }
    }

    pub fn allocate(
        &self,
        spec: &CategorySpec,
        capacity: &ResourceVector,
        history: Option<&UsageHistory>,
    ) -> crate::Result<ResourceVector> {
        self.explain(spec, capacity, history).map(|e| e.allocation)
    }

    pub fn explain(
        &self,
        spec: &CategorySpec,
        capacity: &ResourceVector,
        history: Option<&UsageHistory>,
    ) -> crate::Result<AllocationExplanation> {
        spec.validate()?;
        let explanation = match spec.mode {
            AllocationMode::Fixed => fixed_allocation(spec, capacity),
            AllocationMode::MinWaste => {
                let refined = history
                    .filter(|h| !h.is_empty())
                    .and_then(|h| self.strategy.refine(spec, capacity, h));
                match (refined, &spec.first_guess) {
                    (Some(allocation), _) => AllocationExplanation {
                        allocation,
                        basis: AllocationBasis::Refined,
                        floored: Vec::new(),
                    },
                    (None, Some(guess)) => AllocationExplanation {
                        allocation: guess.to_vector(),
                        basis: AllocationBasis::FirstGuess,
                        floored: Vec::new(),
                    },
                    (None, None) => apply_min(whole_worker(capacity), &spec.min),
                }
            }
        };
        log::debug!(
            "Allocation for category `{}` on {}: {} ({})",
            spec.name,
            capacity,
            explanation.allocation,
            explanation
        );
        Ok(explanation)
    }
}

/// Resolves the allocation of a task of category `spec` on a worker with
/// total resources `capacity`, using the default MIN_WASTE strategy.
pub fn allocate(
    spec: &CategorySpec,
    capacity: &ResourceVector,
    history: Option<&UsageHistory>,
) -> crate::Result<ResourceVector> {
    Allocator::default().allocate(spec, capacity, history)
}

pub fn explain(
    spec: &CategorySpec,
    capacity: &ResourceVector,
) -> crate::Result<AllocationExplanation> {
    Allocator::default().explain(spec, capacity, None)
}

fn whole_worker(capacity: &ResourceVector) -> (ResourceVector, AllocationBasis) {
    (capacity.without_gpus(), AllocationBasis::WholeWorker)
}

fn fixed_allocation(spec: &CategorySpec, capacity: &ResourceVector) -> AllocationExplanation {
    let max = &spec.max;
    if max.is_empty_envelope() {
        return apply_min(whole_worker(capacity), &spec.min);
    }

    let slots = slot_count(max, capacity);
    let mut allocation = ResourceVector::ZERO;
    let mut pinned = Vec::new();
    for kind in ResourceKind::SLOTTED {
        match max.amount(kind) {
            Some(amount) => {
                allocation.set(kind, amount);
                pinned.push(kind);
            }
            None => allocation.set(kind, capacity.get(kind) / slots),
        }
    }
    allocation.gpus = max.amount(ResourceKind::Gpus).unwrap_or(0);
    apply_min(
        (allocation, AllocationBasis::Slots { slots, pinned }),
        &spec.min,
    )
}

/// Number of same-shaped tasks that fit on the worker along the pinned
/// (explicit and nonzero) dimensions; at least one.
fn slot_count(max: &PartialResources, capacity: &ResourceVector) -> u64 {
    ResourceKind::SLOTTED
        .iter()
        .filter_map(|&kind| {
            max.amount(kind)
                .filter(|&amount| amount > 0)
                .map(|amount| capacity.get(kind) / amount)
        })
        .min()
        .unwrap_or(1)
        .max(1)
}

fn apply_min(
    (allocation, basis): (ResourceVector, AllocationBasis),
    min: &PartialResources,
) -> AllocationExplanation {
    let mut result = allocation;
    let mut floored = Vec::new();
    for kind in ResourceKind::ALL {
        let floor: ResourceAmount = min.amount(kind).unwrap_or(0);
        if floor > result.get(kind) {
            result.set(kind, floor);
            floored.push(kind);
        }
    }
    AllocationExplanation {
        allocation: result,
        basis,
        floored,
    }
}
