// =============================================================================
// Indicator primitives for the factor engine
// =============================================================================
//
// Ported from the reference engine's indicator set: `adx`/`atr` operate on
// bar slices, the rest on raw closing-price slices.

pub mod adx;
pub mod atr;
pub mod bollinger;
pub mod ema;
pub mod obv;
pub mod roc;
pub mod rsi;
pub mod vadr;

pub use adx::calculate_adx;
pub use atr::{calculate_atr, calculate_atr_pct};
pub use bollinger::{calculate_bollinger, BollingerResult};
pub use ema::{calculate_ema, ema_trend_aligned};
pub use obv::{calculate_obv, obv_slope};
pub use roc::{calculate_roc, current_roc};
pub use rsi::{calculate_rsi, current_rsi};
pub use vadr::{calculate_vadr, rolling_vadr_series, vadr_percentile};
