//! The OOM fallback ladder.
//!
//! A job-scoped, monotonic state machine over the configured step order.
//! Transient-resource faults advance it; nothing ever un-fires a step, so
//! the ladder level observed by any shot is >= the level seen by every
//! prior shot in the same job.

use framely_models::{DetectorKind, LadderStep};

/// What the controller decided for one transient fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LadderAction {
    /// A parameter-shrinking step fired; retry the detector once under
    /// the reduced capability.
    RetryReduced(LadderStep),
    /// A step fired that disables the offender itself (or its dependency);
    /// record the detector as skipped.
    SkipDisabled(LadderStep),
    /// Every relevant step already fired; skip without advancing.
    SkipExhausted,
}

/// One ladder firing, for the bundle's reasons and risk synthesis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiredStep {
    pub step: LadderStep,
    /// Index of the step in the configured order (0-based).
    pub index: usize,
    pub shot_id: u32,
    pub detector: DetectorKind,
}

/// Job-scoped fallback controller.
#[derive(Debug)]
pub struct FallbackLadder {
    order: Vec<LadderStep>,
    fired: Vec<FiredStep>,
}

impl FallbackLadder {
    pub fn new(order: Vec<LadderStep>) -> Self {
        Self { order, fired: Vec::new() }
    }

    /// Number of steps fired so far.
    pub fn level(&self) -> usize {
        self.fired.len()
    }

    /// Highest fired step index + 1 (0 when nothing fired).
    pub fn max_index(&self) -> usize {
        self.fired.iter().map(|f| f.index + 1).max().unwrap_or(0)
    }

    pub fn fired(&self) -> &[FiredStep] {
        &self.fired
    }

    pub fn is_fired(&self, step: LadderStep) -> bool {
        self.fired.iter().any(|f| f.step == step)
    }

    /// The skip reason for a detector currently disabled by the ladder,
    /// if any.
    pub fn disabled_reason(&self, kind: DetectorKind) -> Option<&'static str> {
        match kind {
            DetectorKind::MaskRefinement if self.is_fired(LadderStep::DisableMaskRefinement) => {
                Some(LadderStep::DisableMaskRefinement.reason())
            }
            DetectorKind::SuperResolution | DetectorKind::ObjectsFine
                if self.is_fired(LadderStep::DisableSuperResolution) =>
            {
                Some(LadderStep::DisableSuperResolution.reason())
            }
            _ => None,
        }
    }

    /// Handle a transient-resource fault at a failure site.
    ///
    /// Fires the first unfired step relevant to the site. Non-transient
    /// faults never reach this method.
    pub fn on_transient(&mut self, kind: DetectorKind, shot_id: u32) -> LadderAction {
        // A concurrent shot may fault on a capability that was disabled
        // while it was already in flight; skipping under the fired step
        // is enough, no new step burns.
        if let Some(step) = self.fired.iter().find_map(|f| match f.step {
            LadderStep::DisableMaskRefinement if kind == DetectorKind::MaskRefinement => {
                Some(f.step)
            }
            LadderStep::DisableSuperResolution
                if matches!(kind, DetectorKind::SuperResolution | DetectorKind::ObjectsFine) =>
            {
                Some(f.step)
            }
            _ => None,
        }) {
            return LadderAction::SkipDisabled(step);
        }

        let next = self
            .order
            .iter()
            .enumerate()
            .find(|(_, step)| !self.is_fired(**step) && step_relevant(**step, kind));

        let Some((index, &step)) = next else {
            return LadderAction::SkipExhausted;
        };
        self.fired.push(FiredStep { step, index, shot_id, detector: kind });

        match step {
            LadderStep::ShrinkVlContext | LadderStep::SingleScaleTiling => {
                LadderAction::RetryReduced(step)
            }
            LadderStep::DisableMaskRefinement
            | LadderStep::DisableSuperResolution
            | LadderStep::SkipOffender => LadderAction::SkipDisabled(step),
        }
    }
}

/// Whether a ladder step reduces capability at the given failure site.
fn step_relevant(step: LadderStep, kind: DetectorKind) -> bool {
    match step {
        LadderStep::DisableMaskRefinement => kind == DetectorKind::MaskRefinement,
        LadderStep::DisableSuperResolution => {
            matches!(kind, DetectorKind::SuperResolution | DetectorKind::ObjectsFine)
        }
        LadderStep::ShrinkVlContext => kind == DetectorKind::Reasoning,
        LadderStep::SingleScaleTiling => kind == DetectorKind::ObjectsTiled,
        LadderStep::SkipOffender => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ladder() -> FallbackLadder {
        FallbackLadder::new(LadderStep::default_order())
    }

    #[test]
    fn mask_fault_fires_step_one_and_skips() {
        let mut ladder = ladder();
        let action = ladder.on_transient(DetectorKind::MaskRefinement, 0);
        assert_eq!(action, LadderAction::SkipDisabled(LadderStep::DisableMaskRefinement));
        assert_eq!(ladder.level(), 1);
        assert_eq!(
            ladder.disabled_reason(DetectorKind::MaskRefinement),
            Some("mask_refinement_disabled")
        );
    }

    #[test]
    fn ladder_state_is_monotonic_across_shots() {
        let mut ladder = ladder();
        ladder.on_transient(DetectorKind::MaskRefinement, 0);
        let level_after_shot0 = ladder.level();
        ladder.on_transient(DetectorKind::ObjectsFine, 3);
        assert!(ladder.level() >= level_after_shot0);
        assert!(ladder.is_fired(LadderStep::DisableMaskRefinement));
        assert!(ladder.is_fired(LadderStep::DisableSuperResolution));
    }

    #[test]
    fn sr_disable_also_covers_fine_pass() {
        let mut ladder = ladder();
        ladder.on_transient(DetectorKind::SuperResolution, 1);
        assert_eq!(
            ladder.disabled_reason(DetectorKind::ObjectsFine),
            Some("super_resolution_disabled")
        );
    }

    #[test]
    fn vl_fault_shrinks_context_then_exhausts_to_skip_offender() {
        let mut ladder = ladder();
        assert_eq!(
            ladder.on_transient(DetectorKind::Reasoning, 0),
            LadderAction::RetryReduced(LadderStep::ShrinkVlContext)
        );
        assert_eq!(
            ladder.on_transient(DetectorKind::Reasoning, 1),
            LadderAction::SkipDisabled(LadderStep::SkipOffender)
        );
        assert_eq!(ladder.on_transient(DetectorKind::Reasoning, 2), LadderAction::SkipExhausted);
    }

    #[test]
    fn coarse_fault_goes_straight_to_skip_offender() {
        let mut ladder = ladder();
        assert_eq!(
            ladder.on_transient(DetectorKind::ObjectsCoarse, 0),
            LadderAction::SkipDisabled(LadderStep::SkipOffender)
        );
        // The generic step is spent; further unrelated faults exhaust.
        assert_eq!(ladder.on_transient(DetectorKind::Color, 1), LadderAction::SkipExhausted);
    }

    #[test]
    fn tiled_fault_retries_single_scale() {
        let mut ladder = ladder();
        assert_eq!(
            ladder.on_transient(DetectorKind::ObjectsTiled, 0),
            LadderAction::RetryReduced(LadderStep::SingleScaleTiling)
        );
        assert_eq!(ladder.max_index(), 4);
    }
}
