//! Subscriber segmentation: compiles nested condition groups into
//! parameterized filters, and manages the segments built from them.

pub mod builder;
pub mod compiler;
pub mod condition;
pub mod engine;
pub mod error;
pub mod expr;
pub mod fields;
pub mod group;
pub mod query;
pub mod store;

pub use builder::SegmentQueryBuilder;
pub use compiler::{CompiledFilter, Mode, SegmentCompiler};
pub use condition::{CompileOptions, Fallback};
pub use engine::{Segment, SegmentDefinition, SegmentationEngine};
pub use error::{SegmentError, SegmentResult};
pub use fields::{FieldResolver, StorageField};
pub use query::{Condition, ConditionGroup, LogicalOperator, Operator, SegmentQuery};
pub use store::{InMemorySubscriberStore, SubscriberStore};
