//! Virtual machine
//!
//! 스택 + 고정 레지스터 기반 인터프리터. 실행은 두 단계로 나뉜다:
//!
//! 1. **Query**: 쿼리 프로그램이 `result`를 채운다.
//! 2. **Mutate** (선택): 변경 프로그램이 `result`의 각 문서를 수정하고 재색인한다.
//!
//! Registers: `0` working document array, `1` current document,
//! `3` loaded program.

use super::mutate;
use super::opcode::Opcode;
use super::predicate::evaluate;
use super::program::{Instruction, Program, SortOrder, SortSpec};
use crate::collection::DocumentStore;
use crate::document::{DocId, canonical_cmp, lookup_path};
use crate::error::{DqxError, DqxResult};
use ahash::AHashSet;
use serde_json::Value;
use smallvec::SmallVec;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Operand stack entry.
#[derive(Debug, Clone, PartialEq)]
pub enum StackValue {
    Docs(Vec<DocId>),
    Bool(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Query,
    Mutate,
}

/// Fixed register file.
#[derive(Debug, Clone, Default)]
pub struct Registers {
    /// Register 0: working document array
    pub documents: Vec<DocId>,
    /// Register 1: document under evaluation
    pub current: Option<DocId>,
    /// Register 3: loaded program
    pub program: Option<Arc<Program>>,
}

/// Per-execution VM state. Cheap to create; not shared across queries.
#[derive(Debug)]
pub struct VirtualMachine {
    running: bool,
    halted: bool,
    upsert: bool,
    ip: usize,
    docptr: usize,
    phase: Phase,
    registers: Registers,
    stack: SmallVec<[StackValue; 8]>,
    result: Vec<DocId>,
    pending_mutate: Option<Arc<Program>>,
}

impl Default for VirtualMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualMachine {
    pub fn new() -> Self {
        Self {
            running: false,
            halted: false,
            upsert: false,
            ip: 0,
            docptr: 0,
            phase: Phase::Query,
            registers: Registers::default(),
            stack: SmallVec::new(),
            result: Vec::new(),
            pending_mutate: None,
        }
    }

    /// Run `program`, then `mutate` (if any) over every matched document.
    ///
    /// Returns the matched document ids. On error the result is cleared and
    /// nothing partial is returned. If a `break` instruction suspends the
    /// machine, the ids gathered so far are returned and
    /// [`resume`](Self::resume) continues.
    pub fn execute(
        &mut self,
        store: &mut dyn DocumentStore,
        program: Arc<Program>,
        mutate: Option<Arc<Program>>,
        upsert: bool,
    ) -> DqxResult<Vec<DocId>> {
        self.reset();
        self.upsert = upsert;
        self.registers.program = Some(program);
        self.pending_mutate = mutate;
        self.running = true;
        self.drive(store)
    }

    /// Continue from the current instruction pointer after a `break`.
    pub fn resume(&mut self, store: &mut dyn DocumentStore) -> DqxResult<Vec<DocId>> {
        if self.halted {
            return Ok(self.result.clone());
        }
        if self.registers.program.is_none() {
            return Err(DqxError::execution("resume", "no program loaded"));
        }
        self.running = true;
        self.drive(store)
    }

    /// Clear all state for reuse with a new program.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn result(&self) -> &[DocId] {
        &self.result
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Stopped by `break` with work left.
    pub fn is_suspended(&self) -> bool {
        !self.running && !self.halted && self.registers.program.is_some()
    }

    pub fn ip(&self) -> usize {
        self.ip
    }

    pub fn docptr(&self) -> usize {
        self.docptr
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn registers(&self) -> &Registers {
        &self.registers
    }

    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    fn drive(&mut self, store: &mut dyn DocumentStore) -> DqxResult<Vec<DocId>> {
        match self.run(store) {
            Ok(()) => {
                debug!(
                    results = self.result.len(),
                    halted = self.halted,
                    phase = ?self.phase,
                    "execution stopped"
                );
                Ok(self.result.clone())
            }
            Err(e) => {
                // The failing document may already be partly mutated.
                if self.phase == Phase::Mutate
                    && let Some(id) = self.registers.current
                    && let Err(reindex_err) = store.reindex(id)
                {
                    warn!(doc = id, error = %reindex_err, "reindex after failed mutation");
                }
                self.result.clear();
                self.stack.clear();
                self.running = false;
                self.halted = true;
                Err(e)
            }
        }
    }

    fn run(&mut self, store: &mut dyn DocumentStore) -> DqxResult<()> {
        loop {
            let program = self
                .registers
                .program
                .clone()
                .ok_or_else(|| DqxError::execution("fetch", "no program loaded"))?;

            while self.running {
                let instruction = program.get(self.ip).ok_or_else(|| {
                    DqxError::execution(
                        "fetch",
                        format!("instruction pointer {} out of bounds", self.ip),
                    )
                })?;
                trace!(ip = self.ip, op = %instruction.opcode(), "step");
                self.step(store, instruction)?;
            }

            if !self.halted {
                return Ok(());
            }
            match (self.phase, self.pending_mutate.take()) {
                (Phase::Query, Some(mutate)) => self.enter_mutate(mutate),
                _ => return Ok(()),
            }
        }
    }

    fn enter_mutate(&mut self, program: Arc<Program>) {
        self.phase = Phase::Mutate;
        self.registers.program = Some(program);
        self.registers.current = None;
        self.stack.clear();
        self.ip = 0;
        self.docptr = 0;
        self.halted = false;
        self.running = true;
    }

    fn halt(&mut self) {
        self.running = false;
        self.halted = true;
    }

    fn step(&mut self, store: &mut dyn DocumentStore, instruction: &Instruction) -> DqxResult<()> {
        let opcode = instruction.opcode();
        if opcode.is_mutation() || opcode == Opcode::RIndex {
            self.require_mutate_phase(opcode.mnemonic())?;
        }
        match instruction {
            Instruction::Halt => self.halt(),
            Instruction::And(n) => {
                let values = self.pop_bools(*n, opcode.mnemonic())?;
                self.stack.push(StackValue::Bool(values.iter().all(|b| *b)));
            }
            Instruction::Or(n) => {
                let values = self.pop_bools(*n, opcode.mnemonic())?;
                self.stack.push(StackValue::Bool(values.iter().any(|b| *b)));
            }
            Instruction::Test { op, path, operand } => {
                let id = self.current(opcode.mnemonic())?;
                let doc = store.document(id).ok_or(DqxError::DocumentNotFound(id))?;
                let matched = evaluate(*op, lookup_path(doc, path), operand);
                self.stack.push(StackValue::Bool(matched));
            }
            Instruction::Mutate { op, path, operand } => {
                let id = self.current(opcode.mnemonic())?;
                let doc = store.document_mut(id).ok_or(DqxError::DocumentNotFound(id))?;
                mutate::apply(*op, doc, path, operand, self.upsert)?;
            }
            Instruction::Break => {
                self.running = false;
            }
            Instruction::Find { index, key, .. } => {
                let handle = store.indices().get(*index).ok_or_else(|| {
                    DqxError::execution("find", format!("no index at position {index}"))
                })?;
                let ids = handle.search(key)?;
                self.stack.push(StackValue::Docs(ids));
            }
            Instruction::Scan { collection } => {
                if collection.as_str() != store.name() {
                    return Err(DqxError::execution(
                        "scan",
                        format!("program targets '{collection}', not '{}'", store.name()),
                    ));
                }
                let ids = store.find_all();
                if ids.is_empty() {
                    self.halt();
                } else {
                    self.stack.push(StackValue::Docs(ids));
                }
            }
            Instruction::Range {
                index,
                min,
                max,
                include_min,
                include_max,
                ..
            } => {
                let handle = store.indices().get(*index).ok_or_else(|| {
                    DqxError::execution("range", format!("no index at position {index}"))
                })?;
                let ids = handle.range(min.as_ref(), max.as_ref(), *include_min, *include_max)?;
                self.stack.push(StackValue::Docs(ids));
            }
            Instruction::Shift => {
                if self.pop_bool("shift")? {
                    let id = self.current("shift")?;
                    self.result.push(id);
                }
            }
            Instruction::Store => {
                self.registers.documents = self.pop_docs("store")?;
                self.docptr = 0;
            }
            Instruction::Intersect => {
                let ids = self.intersect()?;
                if ids.is_empty() {
                    self.halt();
                } else {
                    self.stack.push(StackValue::Docs(ids));
                }
            }
            Instruction::Start => self.running = true,
            Instruction::Jump(target) => {
                if self.docptr >= self.registers.documents.len() {
                    self.ip = *target;
                    return Ok(());
                }
            }
            Instruction::Goto(target) => {
                self.ip = *target;
                return Ok(());
            }
            Instruction::Read => match self.registers.documents.get(self.docptr) {
                Some(&id) => {
                    self.registers.current = Some(id);
                    self.docptr += 1;
                }
                None => self.halt(),
            },
            Instruction::Transpose => {
                self.result.extend_from_slice(&self.registers.documents);
            }
            Instruction::Limit(n) => self.result.truncate(*n),
            Instruction::Sort(spec) => self.sort(store, spec),
            Instruction::RRead => match self.result.get(self.docptr) {
                Some(&id) => {
                    self.registers.current = Some(id);
                    self.docptr += 1;
                }
                None => self.halt(),
            },
            Instruction::RIndex => {
                let id = self.current("rindex")?;
                store.reindex(id)?;
            }
        }
        self.ip += 1;
        Ok(())
    }

    fn require_mutate_phase(&self, opcode: &str) -> DqxResult<()> {
        if self.phase == Phase::Mutate {
            Ok(())
        } else {
            Err(DqxError::execution(opcode, "mutation outside the mutate phase"))
        }
    }

    fn current(&self, opcode: &str) -> DqxResult<DocId> {
        self.registers
            .current
            .ok_or_else(|| DqxError::execution(opcode, "register 1 is empty"))
    }

    fn pop_bool(&mut self, opcode: &str) -> DqxResult<bool> {
        match self.stack.pop() {
            Some(StackValue::Bool(b)) => Ok(b),
            Some(StackValue::Docs(_)) => Err(DqxError::execution(opcode, "expected a boolean")),
            None => Err(DqxError::execution(opcode, "stack underflow")),
        }
    }

    fn pop_bools(&mut self, n: usize, opcode: &str) -> DqxResult<SmallVec<[bool; 8]>> {
        (0..n).map(|_| self.pop_bool(opcode)).collect()
    }

    fn pop_docs(&mut self, opcode: &str) -> DqxResult<Vec<DocId>> {
        match self.stack.pop() {
            Some(StackValue::Docs(ids)) => Ok(ids),
            Some(StackValue::Bool(_)) => {
                Err(DqxError::execution(opcode, "expected a document array"))
            }
            None => Err(DqxError::execution(opcode, "stack underflow")),
        }
    }

    /// Pop every array on the stack; keep the order of the first one pushed.
    fn intersect(&mut self) -> DqxResult<Vec<DocId>> {
        let mut arrays = Vec::with_capacity(self.stack.len());
        while !self.stack.is_empty() {
            arrays.push(self.pop_docs("intersect")?);
        }
        let Some(first) = arrays.pop() else {
            return Err(DqxError::execution("intersect", "stack underflow"));
        };
        let sets: Vec<AHashSet<DocId>> = arrays
            .into_iter()
            .map(|ids| ids.into_iter().collect())
            .collect();
        Ok(first
            .into_iter()
            .filter(|id| sets.iter().all(|s| s.contains(id)))
            .collect())
    }

    fn sort(&mut self, store: &dyn DocumentStore, spec: &SortSpec) {
        let mut keyed: Vec<(Value, DocId)> = self
            .result
            .iter()
            .map(|&id| {
                let key = store
                    .document(id)
                    .and_then(|doc| lookup_path(doc, &spec.path))
                    .cloned()
                    .unwrap_or(Value::Null);
                (key, id)
            })
            .collect();
        keyed.sort_by(|a, b| {
            let ord = canonical_cmp(&a.0, &b.0);
            match spec.order {
                SortOrder::Ascending => ord,
                SortOrder::Descending => ord.reverse(),
            }
        });
        self.result = keyed.into_iter().map(|(_, id)| id).collect();
    }
}
