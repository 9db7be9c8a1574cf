// =============================================================================
// Regime Detection Module
// =============================================================================
//
// `detector` runs the 4h majority-vote classifier over `RegimeIndicators`
// (spec §4.3). `hurst` and `entropy` are retained indicator primitives reused
// by the trend-quality gate and the factor engine's technical composite.

pub mod detector;
pub mod entropy;
pub mod hurst;

pub use detector::RegimeDetector;
pub use entropy::ShannonEntropyFilter;
pub use hurst::calculate_hurst_exponent;
