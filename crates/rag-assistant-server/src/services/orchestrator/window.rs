use std::collections::HashMap;

/// One expansion step of the progressive window, clamped at the cap
pub fn next_radius(current: u32, step: u32, max: u32) -> u32 {
    current.saturating_add(step).min(max)
}

/// Per-request window state: each section starts small and every repeated
/// fetch on the same section expands monotonically toward the cap. The cap
/// holds even if the model asks for more.
#[derive(Debug, Clone)]
pub struct ProgressiveWindowState {
    initial: u32,
    step: u32,
    max: u32,
    per_section: HashMap<String, u32>,
}

impl ProgressiveWindowState {
    pub fn new(max: u32) -> Self {
        Self {
            initial: 1.min(max),
            step: 1,
            max,
            per_section: HashMap::new(),
        }
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    /// Current per-side radius for the section, post-incremented toward
    /// the cap
    pub fn next(&mut self, section_id: &str) -> u32 {
        let current = self
            .per_section
            .get(section_id)
            .copied()
            .unwrap_or(self.initial);
        self.per_section.insert(
            section_id.to_string(),
            next_radius(current, self.step, self.max),
        );
        current
    }

    /// Clamp a model-supplied radius into [0, max]
    pub fn clamp(&self, requested: u32) -> u32 {
        requested.min(self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_radius_clamps_at_max() {
        assert_eq!(next_radius(1, 1, 5), 2);
        assert_eq!(next_radius(5, 1, 5), 5);
        assert_eq!(next_radius(0, 1, 0), 0);
    }

    #[test]
    fn first_call_is_small_then_expands_monotonically() {
        let mut state = ProgressiveWindowState::new(3);
        let radii: Vec<u32> = (0..6).map(|_| state.next("sec_a")).collect();
        assert_eq!(radii, vec![1, 2, 3, 3, 3, 3]);
    }

    #[test]
    fn consecutive_results_are_monotone_and_capped() {
        let mut state = ProgressiveWindowState::new(4);
        let mut last = 0;
        for _ in 0..10 {
            let r = state.next("sec");
            assert!(r >= last);
            assert!(r <= 4);
            last = r;
        }
    }

    #[test]
    fn sections_track_independent_radii() {
        let mut state = ProgressiveWindowState::new(5);
        assert_eq!(state.next("sec_a"), 1);
        assert_eq!(state.next("sec_a"), 2);
        assert_eq!(state.next("sec_b"), 1);
    }

    #[test]
    fn zero_cap_stays_zero() {
        let mut state = ProgressiveWindowState::new(0);
        assert_eq!(state.next("sec"), 0);
        assert_eq!(state.next("sec"), 0);
        assert_eq!(state.clamp(9), 0);
    }

    #[test]
    fn clamp_bounds_model_requests() {
        let state = ProgressiveWindowState::new(2);
        assert_eq!(state.clamp(5), 2);
        assert_eq!(state.clamp(1), 1);
    }
}
