//! A bytecode interpreter for a small, C-flavored scripting language.
//!
//! Source is compiled in a single pass directly into bytecode by a Pratt-style parser
//! fused with the code generator, then run by a stack-based virtual machine. See
//! [part III][bytecode] of [Crafting Interpreters][book], of which this is a
//! free-standing implementation rather than a line-by-line port.
//!
//! [book]: https://craftinginterpreters.com/
//! [bytecode]: https://craftinginterpreters.com/a-bytecode-virtual-machine.html

pub mod chunk;
pub mod compiler;
pub mod debug;
pub mod error;
pub mod object;
pub mod scanner;
pub mod table;
pub mod value;
pub mod vm;

mod with_try_from_u8;

/// The type returned by various functions that parse, compile, and run Lox code.
/// This is the standard [std::result::Result], but the error is always
/// [error::InterpretationError]. This type alias is generic for the return type, however.
///
/// ```
/// fn compile() -> nanolox::Result<()> {
///     Ok(())
/// }
/// ```
pub type Result<T> = std::result::Result<T, error::InterpretationError>;

/// Re-exports common items.
///
/// Since Part III of Crafting Interpreters is written in C, which lacks explicit features for
/// scoping across modules, many items are assumed to be globally-visible. Therefore, we export the
/// most common "global" items here:
pub mod prelude {
    pub use crate::chunk::{Chunk, OpCode};
    pub use crate::error::InterpretationError;
    pub use crate::object::{Heap, LoxString, Obj};
    pub use crate::scanner::{Lexeme, Scanner, Token};
    pub use crate::table::Table;
    pub use crate::value::Value;
    pub use crate::vm::VM;
}
