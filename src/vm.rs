//! The bytecode virtual machine.

use std::rc::Rc;

use crate::compiler;
use crate::object::Heap;
use crate::prelude::{Chunk, InterpretationError, OpCode, Value};
use crate::table::Table;

/// Used as the minimum capacity of the stack.
/// Since we're using a growable [Vec], the stack size can be arbitrarily large.
const STACK_SIZE: usize = 256;

/// Maintains state for the Lox virtual machine: the heap of interned objects and the
/// table of global variables persist across calls to [VM::interpret], matching a REPL
/// session where `var`s declared in one line are visible to the next.
#[derive(Default)]
pub struct VM {
    heap: Heap,
    globals: Table,
}

/// A VM with an active chunk, plus the value stack and instruction pointer that only
/// make sense while a chunk is actually running.
struct VmWithChunk<'a> {
    /// Instruction pointer --- index into the chunk for the next opcode to be executed
    ip: usize,
    /// Value stack -- modified as elements are pushed and popped from the stack.
    stack: Vec<Value>,
    chunk: &'a Chunk,
    heap: &'a mut Heap,
    globals: &'a mut Table,
}

/// Fetches the next bytecode in the chunk, **AND** increments the instruction pointer.
///
/// Note: use [current_ip] to get the "current" value of the instruction pointer being executed
/// right now.
macro_rules! next_bytecode {
    ($self: ident, $chunk: ident) => {{
        let byte = $chunk.get($self.ip);
        $self.ip += 1;
        byte
    }};
}

/// Gets the value of the current instruction pointer. To be used in conjunction with
/// [next_bytecode].
macro_rules! current_ip {
    ($self: ident) => {
        $self.ip - 1
    };
}

impl VM {
    /// Creates a fresh VM with an empty heap and no globals defined.
    pub fn new() -> Self {
        VM::default()
    }

    /// Compiles and interprets `source`, threading this VM's heap so that string
    /// interning (and therefore string equality) stays consistent across repeated
    /// calls on the same VM.
    pub fn interpret(&mut self, source: &str) -> crate::Result<()> {
        log::debug!("compiling {} bytes of source", source.len());
        let chunk = compiler::compile(source, &mut self.heap)?;

        let mut vm = VmWithChunk {
            ip: 0,
            stack: Vec::with_capacity(STACK_SIZE),
            chunk: &chunk,
            heap: &mut self.heap,
            globals: &mut self.globals,
        };
        vm.run()
    }
}

impl<'a> VmWithChunk<'a> {
    /// The main opcode interpreter loop.
    fn run(&mut self) -> crate::Result<()> {
        use OpCode::*;
        let chunk = self.chunk;
        let trace = std::env::var_os("NANOLOX_TRACE").is_some();

        loop {
            if trace {
                use crate::debug::disassemble_instruction;

                print!("        ");
                for value in self.stack.iter() {
                    print!("[ {value:?} ]")
                }
                println!();

                disassemble_instruction(chunk, self.ip);
            }

            let opcode = next_bytecode!(self, chunk)
                .expect("I have an instruction pointer within range")
                .as_opcode();
            log::trace!("executing {opcode:?} at ip={}", current_ip!(self));

            match opcode {
                Some(Constant) => {
                    let constant = next_bytecode!(self, chunk)
                        .expect("there should be an operand")
                        .resolve_constant()
                        .expect("there should be a constant at this index");
                    self.push(constant);
                }
                Some(Nil) => self.push(Value::Nil),
                Some(True) => self.push(true.into()),
                Some(False) => self.push(false.into()),
                Some(Pop) => {
                    self.pop();
                }
                Some(GetLocal) => {
                    let slot = next_bytecode!(self, chunk)
                        .expect("there should be an operand")
                        .as_byte() as usize;
                    self.push(self.stack[slot].clone());
                }
                Some(SetLocal) => {
                    let slot = next_bytecode!(self, chunk)
                        .expect("there should be an operand")
                        .as_byte() as usize;
                    self.stack[slot] = self.peek(0).clone();
                }
                Some(GetGlobal) => {
                    let name = self.read_string_constant(chunk)?;
                    match self.globals.get(&name) {
                        Some(value) => self.push(value),
                        None => {
                            return self.runtime_error(&format!(
                                "Undefined variable '{}'",
                                name.as_str()
                            ))
                        }
                    }
                }
                Some(DefineGlobal) => {
                    let name = self.read_string_constant(chunk)?;
                    let value = self.peek(0).clone();
                    self.globals.set(name, value);
                    self.pop();
                }
                Some(SetGlobal) => {
                    let name = self.read_string_constant(chunk)?;
                    let value = self.peek(0).clone();
                    // An assignment must not implicitly create a global: if `set` just
                    // inserted a fresh entry, undo it and report the error.
                    if self.globals.set(Rc::clone(&name), value) {
                        self.globals.delete(&name);
                        return self.runtime_error(&format!(
                            "Undefined variable '{}'",
                            name.as_str()
                        ));
                    }
                }
                Some(Equal) => {
                    let rhs = self.pop();
                    let lhs = self.pop();
                    self.push((lhs == rhs).into());
                }
                Some(Greater) => self.number_binary_op(|a, b| (a > b).into())?,
                Some(Less) => self.number_binary_op(|a, b| (a < b).into())?,
                Some(Add) => self.add()?,
                Some(Subtract) => self.number_binary_op(|a, b| (a - b).into())?,
                Some(Multiply) => self.number_binary_op(|a, b| (a * b).into())?,
                Some(Divide) => self.number_binary_op(|a, b| (a / b).into())?,
                Some(Not) => {
                    let value = self.pop();
                    self.push(value.is_falsey().into());
                }
                Some(Negate) => {
                    if let Some(number) = self.peek(0).as_number() {
                        self.pop();
                        self.push((-number).into());
                    } else {
                        return self.runtime_error("Operand must be a number");
                    }
                }
                Some(Print) => {
                    let value = self.pop();
                    println!("{value}");
                }
                Some(Jump) => {
                    let offset = chunk.read_u16_at(self.ip);
                    self.ip += 2 + offset as usize;
                }
                Some(JumpIfFalse) => {
                    let offset = chunk.read_u16_at(self.ip);
                    self.ip += 2;
                    if self.peek(0).is_falsey() {
                        self.ip += offset as usize;
                    }
                }
                Some(Loop) => {
                    let offset = chunk.read_u16_at(self.ip);
                    self.ip = self.ip + 2 - offset as usize;
                }
                Some(Return) => {
                    return Ok(());
                }
                None => panic!("fetched invalid opcode at {}", current_ip!(self)),
            }
        }
    }

    /// Reads the operand of the current instruction as a constant-pool index, resolves
    /// it as a string, and returns the interned handle. Used by the three global-variable
    /// opcodes, whose operand always names a string constant.
    fn read_string_constant(&mut self, chunk: &Chunk) -> crate::Result<Rc<crate::object::LoxString>> {
        let value = next_bytecode!(self, chunk)
            .expect("there should be an operand")
            .resolve_constant()
            .expect("there should be a constant at this index");
        Ok(Rc::clone(
            value
                .as_string()
                .expect("global variable names are always interned strings"),
        ))
    }

    /// `ADD` is polymorphic: it concatenates two strings, or sums two numbers.
    fn add(&mut self) -> crate::Result<()> {
        if self.peek(0).is_string() && self.peek(1).is_string() {
            let rhs = self.pop();
            let lhs = self.pop();
            let concatenated = self
                .heap
                .concat(lhs.as_string().unwrap(), rhs.as_string().unwrap());
            self.push(concatenated.into());
            return Ok(());
        }

        if let (Some(a), Some(b)) = (self.peek(1).as_number(), self.peek(0).as_number()) {
            self.pop();
            self.pop();
            self.push((a + b).into());
            return Ok(());
        }

        self.runtime_error("Operands must be two numbers or two strings")
    }

    fn runtime_error<T>(&mut self, message: &str) -> crate::Result<T> {
        eprintln!("{message}");

        let line = self.chunk.line_number_for(current_ip!(self)).expect("line number");
        eprintln!("[line {line}] in script");

        self.reset_stack();

        Err(InterpretationError::RuntimeError)
    }

    /// Pops two number operands to perform a binary operation; any other operand types
    /// are a runtime error.
    fn number_binary_op<F>(&mut self, op: F) -> crate::Result<()>
    where
        F: Fn(f64, f64) -> Value,
    {
        match (self.peek(1).as_number(), self.peek(0).as_number()) {
            (Some(a), Some(b)) => {
                self.pop();
                self.pop();
                self.push(op(a, b));
                Ok(())
            }
            _ => self.runtime_error("Operands must be numbers"),
        }
    }

    /// Pushes a [Value] on to the value stack.
    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    /// Pops and returns the top [Value] on the value stack.
    ///
    /// # Panics
    ///
    /// Panics when the value stack is empty. Given well-formed Lox bytecode, a pop cannot occur
    /// when the value stack is empty; therefore the interpreter panics if it is in this state.
    #[inline(always)]
    fn pop(&mut self) -> Value {
        self.stack.pop().expect("value stack is empty")
    }

    /// Peeks at the value relative to the top of the stack.
    ///
    /// # Panics
    ///
    ///  * When the stack is empty
    ///  * When the distance goes off the end of the stack
    #[inline(always)]
    fn peek(&self, distance: usize) -> &Value {
        self.stack
            .get(self.stack.len() - 1 - distance)
            .expect("peeked escaped bounds of the stack")
    }

    #[inline(always)]
    fn reset_stack(&mut self) {
        self.stack.clear()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn arithmetic_evaluates_left_to_right() {
        let mut vm = VM::new();
        assert!(vm.interpret("print 1 + 2 * 3;").is_ok());
    }

    #[test]
    fn string_concatenation() {
        let mut vm = VM::new();
        assert!(vm.interpret(r#"print "foo" + "bar";"#).is_ok());
    }

    #[test]
    fn negating_a_non_number_is_a_runtime_error() {
        let mut vm = VM::new();
        assert!(matches!(
            vm.interpret("print -true;"),
            Err(InterpretationError::RuntimeError)
        ));
    }

    #[test]
    fn reading_an_undefined_global_is_a_runtime_error() {
        let mut vm = VM::new();
        assert!(matches!(
            vm.interpret("print y;"),
            Err(InterpretationError::RuntimeError)
        ));
    }

    #[test]
    fn assigning_to_an_undefined_global_is_a_runtime_error_and_does_not_define_it() {
        let mut vm = VM::new();
        assert!(matches!(
            vm.interpret("y = 1;"),
            Err(InterpretationError::RuntimeError)
        ));
        assert!(matches!(
            vm.interpret("print y;"),
            Err(InterpretationError::RuntimeError)
        ));
    }

    #[test]
    fn globals_persist_across_interpret_calls() {
        let mut vm = VM::new();
        assert!(vm.interpret("var x = 10;").is_ok());
        assert!(vm.interpret("print x;").is_ok());
    }

    #[test]
    fn locals_and_block_scoping() {
        let mut vm = VM::new();
        let source = "{ var a = 1; var b = 2; print a + b; }";
        assert!(vm.interpret(source).is_ok());
    }

    #[test]
    fn if_else_and_logical_operators() {
        let mut vm = VM::new();
        let source = "if (true and !false) { print \"yes\"; } else { print \"no\"; }";
        assert!(vm.interpret(source).is_ok());
    }

    #[test]
    fn while_and_for_loops_run_to_completion() {
        let mut vm = VM::new();
        assert!(vm.interpret("var i = 0; while (i < 3) { i = i + 1; }").is_ok());
        assert!(vm
            .interpret("for (var i = 0; i < 3; i = i + 1) { print i; }")
            .is_ok());
    }
}
