//! Seeded random number generation.
//!
//! Every generator is identified by a zero-sized type declared with [`define_rng!`] and is
//! seeded from the base seed given to `ContextRandomExt::init_random` offset by a hash of the
//! generator's name. Generators are created lazily on first use, so a generator that is
//! never sampled never perturbs the others.
//!
//! The simulation engine draws every sample from the single generator [`SimulationRng`].
//! Runs are reproducible as long as the base seed is set once per run and the tick order is
//! followed, since every draw advances that one stream.
mod context_ext;
mod macros;

use std::any::{Any, TypeId};
use std::cell::RefCell;

pub use context_ext::ContextRandomExt;
pub use macros::define_rng;

use crate::rand::SeedableRng;
use crate::{define_data_plugin, HashMap};

pub trait RngId: Copy + Clone {
    type RngType: SeedableRng;
    fn get_name() -> &'static str;
}

define_rng!(pub SimulationRng);

// This is a wrapper that allows for future support for different types of
// random number generators (anything that implements SeedableRng is valid).
struct RngHolder {
    rng: Box<dyn Any>,
}

struct RngData {
    base_seed: u64,
    rng_holders: RefCell<HashMap<TypeId, RngHolder>>,
}

// Registers a data container which stores:
// * base_seed: A base seed for all rngs
// * rng_holders: A map of rngs, keyed by their RngId. Note that this is
//   stored in a RefCell to allow for mutable borrow without requiring a
//   mutable borrow of the Context itself.
define_data_plugin!(
    RngPlugin,
    RngData,
    RngData {
        base_seed: 0,
        rng_holders: RefCell::new(HashMap::default()),
    }
);
