//! Guard and action expressions.
//!
//! A small interpreted language over an entity's attribute snapshot:
//! boolean guards decide which transition fires, actions mutate attributes
//! when a transition is taken. Parsing happens once at configuration load;
//! evaluation never fails because an attribute is missing.

pub mod ast;
pub mod eval;
pub mod parser;

pub use ast::{Action, CmpOp, Guard, Operand, Statement, ValueExpr};
pub use eval::{apply_action, evaluate_guard, EvalError};
pub use parser::{parse_action, parse_guard};
