// =============================================================================
// Factor engine — raw factors, Gram-Schmidt orthogonalization, composite score
// =============================================================================
//
// `indicators` holds the reference engine's indicator primitives, ported onto
// `types::Bar`. `engine` computes the six raw factors per symbol. `orthogonal`
// runs the fixed-order Gram-Schmidt pass that produces a `ResidualSet`.

pub mod engine;
pub mod indicators;
pub mod orthogonal;

pub use engine::{FactorEngine, FactorInputs, TimeframeBars};
pub use orthogonal::orthogonalize;
