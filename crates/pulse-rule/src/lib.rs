//! 告警规则：表达式语言、规则文件、状态机与调度

pub mod evaluator;
pub mod expr;
pub mod loader;
pub mod model;
pub mod scheduler;
pub mod state;
pub mod template;

pub use evaluator::{RuleEvaluator, RuleHealth, RuleStatus};
pub use expr::{parse_expr, Expr};
pub use loader::RuleLoader;
pub use model::{Rule, RuleFile, RuleGroup, RuleSet};
pub use scheduler::RuleScheduler;
pub use state::{InstanceState, RuleInstance, Transition};
