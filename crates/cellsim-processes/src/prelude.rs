//! cellsim Processes Prelude - convenient imports for common usage.
//!
//! ```rust
//! use cellsim_processes::prelude::*;
//! ```

pub use crate::degradation::{Degradation, DegradationConfig};
pub use crate::growth::{Growth, GrowthConfig};
pub use crate::metabolism::{Metabolism, MetabolismConfig};
pub use crate::starvation::{Starvation, StarvationConfig};
pub use crate::transport::{Direction, Transport, TransportConfig};

pub use crate::presets::glucose_colony;
pub use crate::registry::{default_registry, register_defaults};
