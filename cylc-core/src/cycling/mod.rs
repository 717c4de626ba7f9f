//! Cycling engine: cycle points, recurrence sequences, parameter
//! expansion, and graph-string parsing.

pub mod graph;
pub mod param;
pub mod point;
pub mod sequence;

pub use graph::{parse_graph, AtomicPrereq, Expr, Families, Graph, Trigger};
pub use param::{parse_param_refs, render_name, resolve_refs, ParamAxis, ParamRef, ParamTable};
pub use point::{Calendar, CyclePoint, Duration};
pub use sequence::Sequence;
