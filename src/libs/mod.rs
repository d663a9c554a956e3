pub mod aligner;
pub mod chunk;
pub mod context;
pub mod distributor;
pub mod error;
pub mod hit;
pub mod io;
pub mod matrix;
pub mod pair;
pub mod reduce;
pub mod registry;
