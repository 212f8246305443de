//! # cellsim Processes
//!
//! Reference process implementations built on the cellsim process contract.
//!
//! Each process owns only its immutable configuration and sees the cell
//! through its ports:
//!
//! - **Metabolism** - converts a substrate (and optional cofactor) into a product, rationed
//! - **Degradation** - first-order decay of a pool, rationed against other consumers
//! - **Transport** - saturable uptake from, or secretion into, the shared field
//! - **Growth** - exponential mass accumulation that raises the division flag
//! - **Starvation** - raises the lysis flag after a nutrient stays low for too long
//!
//! [`default_registry`] registers all of them under their kind names, and
//! [`presets::glucose_colony`] wires them into a runnable colony.

pub mod quantity;
pub mod metabolism;
pub mod degradation;
pub mod transport;
pub mod growth;
pub mod starvation;
pub mod registry;
pub mod presets;
pub mod prelude;

pub use registry::default_registry;
