use anyhow::{Result, bail};

use crate::analyzer::{AnalyzedProgram, CallExpr, CallTarget, Expr, Stmt};
use crate::ast::{BinaryOperator, Literal};
use crate::cpool::{ConstantPool, PoolValue};
use crate::types::VarType;

/// Stack-machine opcodes with their fixed ABI numbering. Values 0..=13 are
/// inherited; the comparison opcodes and `Pop` are assigned by this
/// implementation and documented in DESIGN.md.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    PushConst = 0,
    Jmp = 1,
    GetLocal = 2,
    SetLocal = 3,
    Return = 4,
    Jz = 5,
    Eq = 6,
    Call = 7,
    NativeCall = 8,
    Add = 9,
    Sub = 10,
    Div = 11,
    Mul = 12,
    Mod = 13,
    Neq = 14,
    Less = 15,
    LessEq = 16,
    More = 17,
    MoreEq = 18,
    Pop = 19,
}

/// Encoded operand width of an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandWidth {
    None,
    Short,
    Wide,
}

impl Opcode {
    pub fn operand_width(self) -> OperandWidth {
        match self {
            Opcode::PushConst | Opcode::NativeCall | Opcode::SetLocal | Opcode::GetLocal => {
                OperandWidth::Short
            }
            Opcode::Call | Opcode::Jz | Opcode::Jmp => OperandWidth::Wide,
            _ => OperandWidth::None,
        }
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::PushConst => "PUSHCONST",
            Opcode::Jmp => "JMP",
            Opcode::GetLocal => "GETLOCAL",
            Opcode::SetLocal => "SETLOCAL",
            Opcode::Return => "RETURN",
            Opcode::Jz => "JZ",
            Opcode::Eq => "EQ",
            Opcode::Call => "CALL",
            Opcode::NativeCall => "NATIVECALL",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Div => "DIV",
            Opcode::Mul => "MUL",
            Opcode::Mod => "MOD",
            Opcode::Neq => "NEQ",
            Opcode::Less => "LESS",
            Opcode::LessEq => "LESSEQ",
            Opcode::More => "MORE",
            Opcode::MoreEq => "MOREEQ",
            Opcode::Pop => "POP",
        }
    }
}

/// Arena-indexed patch target. Labels receive their address in the layout
/// pass; pending jumps reference them through the fixup side table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

/// One slot in a method's instruction list. `Label` is a pseudo-instruction:
/// it occupies a slot but contributes no bytes and carries no operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Label(Label),
    Op(Opcode, i32),
}

/// The assembled program, ready for encoding or disassembly.
#[derive(Debug, PartialEq)]
pub struct Artifact {
    pub methods: Vec<AssembledMethod>,
    pub triggers: Vec<AssembledTrigger>,
    pub cpool: ConstantPool,
}

#[derive(Debug, PartialEq)]
pub struct AssembledMethod {
    pub name: String,
    pub index: usize,
    pub entry_address: i32,
    /// Number of leading locals that are parameters.
    pub params: usize,
    pub local_names: Vec<String>,
    pub code: Vec<Instruction>,
}

#[derive(Debug, PartialEq)]
pub struct AssembledTrigger {
    pub listener_id: i32,
    pub entry_address: i32,
    pub values: Vec<PoolValue>,
}

impl AssembledMethod {
    /// Instructions that survive encoding (labels excluded).
    pub fn encoded_len(&self) -> usize {
        self.code
            .iter()
            .filter(|i| matches!(i, Instruction::Op(..)))
            .count()
    }
}

pub fn assemble(program: &AnalyzedProgram) -> Result<Artifact> {
    let mut assembler = Assembler {
        cpool: ConstantPool::new(),
        code: vec![Vec::new(); program.methods.len()],
        labels: Vec::new(),
        fixups: Vec::new(),
        entries: Vec::new(),
    };

    // Entry labels exist up front so calls can reference not-yet-assembled
    // methods.
    for _ in &program.methods {
        let label = assembler.new_label();
        assembler.entries.push(label);
    }

    for method in &program.methods {
        assembler.assemble_method(method.index, method)?;
    }

    assembler.layout();
    assembler.into_artifact(program)
}

struct Assembler {
    cpool: ConstantPool,
    code: Vec<Vec<Instruction>>,
    /// Address per label; unset until the layout pass runs.
    labels: Vec<Option<i32>>,
    fixups: Vec<Fixup>,
    /// Entry label per method index.
    entries: Vec<Label>,
}

struct Fixup {
    method: usize,
    instruction: usize,
    label: Label,
}

impl Assembler {
    fn assemble_method(&mut self, index: usize, method: &crate::analyzer::Method) -> Result<()> {
        self.place_label(index, self.entries[index]);

        // Callers push arguments in reverse source order, leaving the first
        // argument on top; the prologue stores them into slots 0..n-1.
        for slot in 0..method.params {
            self.emit(index, Opcode::SetLocal, i32::try_from(slot)?);
        }

        self.assemble_stmt(index, &method.body)?;
        self.emit(index, Opcode::Return, 0);
        Ok(())
    }

    fn assemble_stmt(&mut self, method: usize, stmt: &Stmt) -> Result<()> {
        match stmt {
            Stmt::Block(statements) => {
                for statement in statements {
                    self.assemble_stmt(method, statement)?;
                }
            }
            Stmt::VarDecl { local, init } => {
                // Without an initializer the slot is only allocated; its
                // undefined value is the runtime's concern.
                if let Some(init) = init {
                    self.assemble_expr(method, init)?;
                    self.emit(method, Opcode::SetLocal, i32::try_from(*local)?);
                }
            }
            Stmt::Assign { local, value } => {
                self.assemble_expr(method, value)?;
                self.emit(method, Opcode::SetLocal, i32::try_from(*local)?);
            }
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let l_false = self.new_label();
                let l_end = self.new_label();

                self.assemble_expr(method, cond)?;
                self.emit_jump(method, Opcode::Jz, l_false);
                self.assemble_stmt(method, then_branch)?;
                self.emit_jump(method, Opcode::Jmp, l_end);
                self.place_label(method, l_false);
                if let Some(else_branch) = else_branch {
                    self.assemble_stmt(method, else_branch)?;
                }
                self.place_label(method, l_end);
            }
            Stmt::Call(call) => {
                self.assemble_call(method, call)?;
                // A native that returns a value in statement position leaves
                // it on the stack; discard it. Procedure calls push nothing.
                if let CallTarget::Native { return_type, .. } = &call.target {
                    if *return_type != VarType::Void {
                        self.emit(method, Opcode::Pop, 0);
                    }
                }
            }
        }
        Ok(())
    }

    fn assemble_expr(&mut self, method: usize, expr: &Expr) -> Result<()> {
        match expr {
            Expr::Literal(literal) => {
                let index = match literal {
                    Literal::I32(v) => self.cpool.intern_i32(*v),
                    Literal::I64(v) => self.cpool.intern_i64(*v),
                    Literal::Str(v) => self.cpool.intern_str(v),
                    Literal::Bool(v) => self.cpool.intern_i32(i32::from(*v)),
                };
                self.emit(method, Opcode::PushConst, i32::try_from(index)?);
            }
            Expr::Local(index) => {
                self.emit(method, Opcode::GetLocal, i32::try_from(*index)?);
            }
            Expr::Call(call) => self.assemble_call(method, call)?,
            Expr::Binary { left, op, right } => {
                self.assemble_expr(method, left)?;
                self.assemble_expr(method, right)?;
                self.emit(method, operator_opcode(*op), 0);
            }
        }
        Ok(())
    }

    fn assemble_call(&mut self, method: usize, call: &CallExpr) -> Result<()> {
        for arg in call.args.iter().rev() {
            self.assemble_expr(method, arg)?;
        }
        match &call.target {
            CallTarget::Native { id, .. } => self.emit(method, Opcode::NativeCall, *id),
            CallTarget::Proc(callee) => {
                let entry = self.entries[*callee];
                self.emit_jump(method, Opcode::Call, entry);
            }
        }
        Ok(())
    }

    fn emit(&mut self, method: usize, opcode: Opcode, operand: i32) {
        self.code[method].push(Instruction::Op(opcode, operand));
    }

    /// Emits an instruction whose operand is the future address of `label`,
    /// recording a fixup for the layout pass.
    fn emit_jump(&mut self, method: usize, opcode: Opcode, label: Label) {
        let instruction = self.code[method].len();
        self.code[method].push(Instruction::Op(opcode, -1));
        self.fixups.push(Fixup {
            method,
            instruction,
            label,
        });
    }

    fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    fn place_label(&mut self, method: usize, label: Label) {
        self.code[method].push(Instruction::Label(label));
    }

    /// Assigns every label the address of the next real instruction in the
    /// flat program-wide stream, then patches all pending jump and call
    /// operands. Labels contribute no addresses themselves.
    fn layout(&mut self) {
        let mut address: i32 = 0;
        for code in &self.code {
            for instruction in code {
                match instruction {
                    Instruction::Label(label) => self.labels[label.0] = Some(address),
                    Instruction::Op(..) => address += 1,
                }
            }
        }

        for fixup in &self.fixups {
            let target = self.labels[fixup.label.0]
                .expect("every referenced label is placed before layout");
            if let Instruction::Op(_, operand) = &mut self.code[fixup.method][fixup.instruction] {
                *operand = target;
            }
        }
    }

    fn into_artifact(self, program: &AnalyzedProgram) -> Result<Artifact> {
        let mut methods = Vec::with_capacity(program.methods.len());
        for (index, (method, code)) in program.methods.iter().zip(self.code).enumerate() {
            let entry = self.entries[index];
            let Some(entry_address) = self.labels[entry.0] else {
                bail!("method '{}' has no laid-out entry", method.name);
            };
            methods.push(AssembledMethod {
                name: method.name.clone(),
                index: method.index,
                entry_address,
                params: method.params,
                local_names: method.locals.iter().map(|l| l.name.clone()).collect(),
                code,
            });
        }

        let triggers = program
            .triggers
            .iter()
            .map(|trigger| AssembledTrigger {
                listener_id: trigger.listener_id,
                entry_address: methods[trigger.method].entry_address,
                values: trigger.values.clone(),
            })
            .collect();

        Ok(Artifact {
            methods,
            triggers,
            cpool: self.cpool,
        })
    }
}

fn operator_opcode(op: BinaryOperator) -> Opcode {
    match op {
        BinaryOperator::Eq => Opcode::Eq,
        BinaryOperator::Ne => Opcode::Neq,
        BinaryOperator::Lt => Opcode::Less,
        BinaryOperator::Le => Opcode::LessEq,
        BinaryOperator::Gt => Opcode::More,
        BinaryOperator::Ge => Opcode::MoreEq,
        BinaryOperator::Add => Opcode::Add,
        BinaryOperator::Sub => Opcode::Sub,
        BinaryOperator::Mul => Opcode::Mul,
        BinaryOperator::Div => Opcode::Div,
        BinaryOperator::Mod => Opcode::Mod,
    }
}
