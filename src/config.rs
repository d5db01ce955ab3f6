//! Caller-provided incremental-compilation options.

use serde::{Deserialize, Serialize};

use crate::core::CompileOrder;

/// Tuning knobs for the invalidation engine and the driver.
///
/// Any change to compiler version, options, classpath hash set, or
/// compile order between runs is detected via [`CompileSetup`], not
/// here; these options shape how aggressively a run invalidates.
///
/// [`CompileSetup`]: crate::core::CompileSetup
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IncOptions {
    /// When the invalidated fraction of all known classes reaches this
    /// threshold, the whole module is recompiled instead.
    pub recompile_all_fraction: f64,

    /// Number of incremental compile/diff/closure rounds before the
    /// driver bails out to a full recompile.
    pub transitive_step: u32,

    /// Enables member-reference pruning by used-name hashes. When
    /// false, every member-reference dependent of a changed class is
    /// invalidated unconditionally.
    pub name_hashing: bool,

    /// When false, APIs are dropped before persisting the analysis.
    pub store_apis: bool,

    /// Declared ordering between the two compiled languages.
    pub compile_order: CompileOrder,

    /// Opaque key/value pairs passed through to consumers.
    pub extra: Vec<(String, String)>,
}

impl Default for IncOptions {
    fn default() -> Self {
        Self {
            recompile_all_fraction: 0.5,
            transitive_step: 3,
            name_hashing: true,
            store_apis: true,
            compile_order: CompileOrder::Mixed,
            extra: Vec::new(),
        }
    }
}

impl IncOptions {
    /// True when `invalidated` out of `total` classes trips the
    /// recompile-everything threshold.
    pub fn exceeds_recompile_fraction(&self, invalidated: usize, total: usize) -> bool {
        if total == 0 {
            return false;
        }
        invalidated as f64 / total as f64 >= self.recompile_all_fraction
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let opts = IncOptions::default();
        assert_eq!(opts.recompile_all_fraction, 0.5);
        assert_eq!(opts.transitive_step, 3);
        assert!(opts.name_hashing);
        assert!(opts.store_apis);
        assert_eq!(opts.compile_order, CompileOrder::Mixed);
        assert!(opts.extra.is_empty());
    }

    #[test]
    fn fraction_gate_boundaries() {
        let opts = IncOptions::default();
        assert!(!opts.exceeds_recompile_fraction(0, 0));
        assert!(!opts.exceeds_recompile_fraction(4, 10));
        assert!(opts.exceeds_recompile_fraction(5, 10));
        assert!(opts.exceeds_recompile_fraction(10, 10));
    }

    #[test]
    fn serde_roundtrip_with_defaults() {
        let opts: IncOptions = serde_json::from_str("{}").expect("defaults");
        assert_eq!(opts.transitive_step, 3);
        let json = serde_json::to_string(&opts).expect("serialize");
        let back: IncOptions = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.recompile_all_fraction, opts.recompile_all_fraction);
    }
}
