//! Tunable runtime policies.
//!
//! Every section has defaults, so a configuration document
//! only needs to mention what it changes.

use {
    serde::{Deserialize, Serialize},
    std::io::Read,
};

/// Configuration of a runtime.
#[allow(missing_docs)]
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct Config
{
    pub heap: HeapPolicy,
    pub gc: GcPolicy,
    pub scheduler: SchedulerPolicy,
}

impl Config
{
    /// Read a configuration from a JSON document.
    pub fn from_json<R>(reader: R) -> serde_json::Result<Self>
        where R: Read
    {
        serde_json::from_reader(reader)
    }
}

/// How the heap grows and recycles instances.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct HeapPolicy
{
    /// Number of cells after the first growth.
    pub initial_cells: usize,

    /// Growth after the first, as a percentage of the current size.
    pub growth_percent: usize,

    /// Growing beyond this many cells fails.
    pub max_cells: Option<usize>,

    /// Bytes each type may keep in freed instances for reuse.
    pub type_buffer_bytes: usize,
}

impl Default for HeapPolicy
{
    fn default() -> Self
    {
        Self{
            initial_cells: 1024,
            growth_percent: 50,
            max_cells: None,
            type_buffer_bytes: 1_000_000,
        }
    }
}

/// When the collector runs.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct GcPolicy
{
    /// Collect after this many instructions since the last collection.
    pub collect_every_ticks: Option<u64>,

    /// Whether a tick that exhausts the heap is retried
    /// once after a collection.
    pub collect_on_exhaustion: bool,
}

impl Default for GcPolicy
{
    fn default() -> Self
    {
        Self{
            collect_every_ticks: Some(1_000_000),
            collect_on_exhaustion: true,
        }
    }
}

/// How fibers share the runtime.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct SchedulerPolicy
{
    /// Instructions a fiber executes before the next fiber's turn.
    pub ticks_per_turn: u64,
}

impl Default for SchedulerPolicy
{
    fn default() -> Self
    {
        Self{ticks_per_turn: 64}
    }
}
