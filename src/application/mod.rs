pub mod agent;
pub mod intents;
pub mod memory;
pub mod normalize;
pub mod registry;
pub mod rewrite;
pub mod stdio;
pub mod tooling;
