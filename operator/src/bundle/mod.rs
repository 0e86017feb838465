/*
 * Bundles: snapshots of every object a RootShard, Shard or FrontProxy
 * needs, exported into one secret once all of them are ready.
 */
pub mod controller;
pub mod engine;
pub mod export;
pub mod object;
pub mod required;
