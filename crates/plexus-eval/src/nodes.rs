//! Reference computables used by tests, benchmarks and the CLI.
//!
//! Each node counts its `compute` calls so callers can assert how often the
//! cache actually ran it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use plexus_core::context::{Context, FRAME};
use plexus_core::error::NodeError;
use plexus_core::hash::FingerprintHasher;
use plexus_core::node::{ComputeScope, Computable, HashScope};
use plexus_core::plug::PlugDescriptor;
use plexus_core::value::{Value, ValueType};

fn int_input(scope: &mut dyn ComputeScope, name: &str) -> Result<i64, NodeError> {
    let value = scope.input(name)?;
    value.as_int().ok_or_else(|| {
        NodeError::failed(format!(
            "input '{name}' is {}, expected int",
            value.value_type()
        ))
    })
}

fn float_input(scope: &mut dyn ComputeScope, name: &str) -> Result<f64, NodeError> {
    let value = scope.input(name)?;
    value.as_float().ok_or_else(|| {
        NodeError::failed(format!(
            "input '{name}' is {}, expected float",
            value.value_type()
        ))
    })
}

// ---------------------------------------------------------------------------
// AddNode
// ---------------------------------------------------------------------------

/// `sum = op1 + op2`, over integers ([`AddNode::new`]) or floats
/// ([`AddNode::float`]).
#[derive(Debug)]
pub struct AddNode {
    value_type: ValueType,
    computes: AtomicUsize,
}

impl AddNode {
    pub fn new() -> Self {
        AddNode {
            value_type: ValueType::Int,
            computes: AtomicUsize::new(0),
        }
    }

    pub fn float() -> Self {
        AddNode {
            value_type: ValueType::Float,
            computes: AtomicUsize::new(0),
        }
    }

    /// Number of `compute` calls so far.
    pub fn computes(&self) -> usize {
        self.computes.load(Ordering::SeqCst)
    }
}

impl Default for AddNode {
    fn default() -> Self {
        AddNode::new()
    }
}

impl Computable for AddNode {
    fn type_name(&self) -> &'static str {
        match self.value_type {
            ValueType::Float => "plexus::AddFloat",
            _ => "plexus::Add",
        }
    }

    fn plugs(&self) -> Vec<PlugDescriptor> {
        vec![
            PlugDescriptor::input("op1", self.value_type),
            PlugDescriptor::input("op2", self.value_type),
            PlugDescriptor::output("sum", self.value_type),
        ]
    }

    fn hash(
        &self,
        _output: &str,
        scope: &mut dyn HashScope,
        hasher: &mut FingerprintHasher,
    ) -> Result<(), NodeError> {
        hasher
            .append_fingerprint(&scope.input_hash("op1")?)
            .append_fingerprint(&scope.input_hash("op2")?);
        Ok(())
    }

    fn compute(&self, _output: &str, scope: &mut dyn ComputeScope) -> Result<Value, NodeError> {
        self.computes.fetch_add(1, Ordering::SeqCst);
        if self.value_type == ValueType::Float {
            let a = float_input(scope, "op1")?;
            let b = float_input(scope, "op2")?;
            return Ok(Value::Float(a + b));
        }
        let a = int_input(scope, "op1")?;
        let b = int_input(scope, "op2")?;
        a.checked_add(b)
            .map(Value::Int)
            .ok_or_else(|| NodeError::failed(format!("{a} + {b} overflows")))
    }
}

// ---------------------------------------------------------------------------
// FrameNode
// ---------------------------------------------------------------------------

/// `out = scale * frame`, reading `frame` from the context (0 when unset).
#[derive(Debug, Default)]
pub struct FrameNode {
    computes: AtomicUsize,
}

impl FrameNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn computes(&self) -> usize {
        self.computes.load(Ordering::SeqCst)
    }
}

impl Computable for FrameNode {
    fn type_name(&self) -> &'static str {
        "plexus::Frame"
    }

    fn plugs(&self) -> Vec<PlugDescriptor> {
        vec![
            PlugDescriptor::input("scale", ValueType::Float).with_default(1.0),
            PlugDescriptor::output("out", ValueType::Float),
        ]
    }

    fn hash(
        &self,
        _output: &str,
        scope: &mut dyn HashScope,
        hasher: &mut FingerprintHasher,
    ) -> Result<(), NodeError> {
        let frame = scope.context().frame().unwrap_or(0.0);
        hasher
            .append_fingerprint(&scope.input_hash("scale")?)
            .append_f64(frame);
        Ok(())
    }

    fn compute(&self, _output: &str, scope: &mut dyn ComputeScope) -> Result<Value, NodeError> {
        self.computes.fetch_add(1, Ordering::SeqCst);
        let frame = scope.context().frame().unwrap_or(0.0);
        let scale = float_input(scope, "scale")?;
        Ok(Value::Float(scale * frame))
    }
}

// ---------------------------------------------------------------------------
// TimeOffsetNode
// ---------------------------------------------------------------------------

/// Evaluates its input at `frame + offset`.
#[derive(Debug)]
pub struct TimeOffsetNode {
    offset: f64,
}

impl TimeOffsetNode {
    pub fn new(offset: f64) -> Self {
        TimeOffsetNode { offset }
    }

    fn shifted(&self, context: &Context) -> Context {
        let frame = context.frame().unwrap_or(0.0);
        context.with_variable(FRAME, frame + self.offset)
    }
}

impl Computable for TimeOffsetNode {
    fn type_name(&self) -> &'static str {
        "plexus::TimeOffset"
    }

    fn plugs(&self) -> Vec<PlugDescriptor> {
        vec![
            PlugDescriptor::input("input", ValueType::Float),
            PlugDescriptor::output("out", ValueType::Float),
        ]
    }

    fn hash(
        &self,
        _output: &str,
        scope: &mut dyn HashScope,
        hasher: &mut FingerprintHasher,
    ) -> Result<(), NodeError> {
        let shifted = self.shifted(scope.context());
        hasher
            .append_f64(self.offset)
            .append_fingerprint(&scope.input_hash_in("input", &shifted)?);
        Ok(())
    }

    fn compute(&self, _output: &str, scope: &mut dyn ComputeScope) -> Result<Value, NodeError> {
        let shifted = self.shifted(scope.context());
        let value = scope.input_in("input", &shifted)?;
        Ok((*value).clone())
    }
}

// ---------------------------------------------------------------------------
// SlowSumNode
// ---------------------------------------------------------------------------

/// Sums `0..count`, sleeping `delay_us` microseconds per unit and polling
/// cancellation before each one.
#[derive(Debug, Default)]
pub struct SlowSumNode {
    computes: AtomicUsize,
    completed: AtomicUsize,
}

impl SlowSumNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `compute` calls started.
    pub fn computes(&self) -> usize {
        self.computes.load(Ordering::SeqCst)
    }

    /// Number of `compute` calls that ran to completion.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

impl Computable for SlowSumNode {
    fn type_name(&self) -> &'static str {
        "plexus::SlowSum"
    }

    fn plugs(&self) -> Vec<PlugDescriptor> {
        vec![
            PlugDescriptor::input("count", ValueType::Int),
            PlugDescriptor::input("delay_us", ValueType::Int),
            PlugDescriptor::output("sum", ValueType::Int),
        ]
    }

    fn hash(
        &self,
        _output: &str,
        scope: &mut dyn HashScope,
        hasher: &mut FingerprintHasher,
    ) -> Result<(), NodeError> {
        // delay_us changes timing only, never the result.
        hasher.append_fingerprint(&scope.input_hash("count")?);
        Ok(())
    }

    fn compute(&self, _output: &str, scope: &mut dyn ComputeScope) -> Result<Value, NodeError> {
        self.computes.fetch_add(1, Ordering::SeqCst);
        let count = int_input(scope, "count")?;
        let delay = Duration::from_micros(int_input(scope, "delay_us")?.max(0) as u64);

        let mut total: i64 = 0;
        for i in 0..count.max(0) {
            scope.check_cancelled()?;
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
            total = total.wrapping_add(i);
        }
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(Value::Int(total))
    }
}

// ---------------------------------------------------------------------------
// FailNode
// ---------------------------------------------------------------------------

/// An integer output whose computation always fails with `message`.
#[derive(Debug)]
pub struct FailNode {
    message: String,
    computes: AtomicUsize,
}

impl FailNode {
    pub fn new(message: impl Into<String>) -> Self {
        FailNode {
            message: message.into(),
            computes: AtomicUsize::new(0),
        }
    }

    pub fn computes(&self) -> usize {
        self.computes.load(Ordering::SeqCst)
    }
}

impl Computable for FailNode {
    fn type_name(&self) -> &'static str {
        "plexus::Fail"
    }

    fn plugs(&self) -> Vec<PlugDescriptor> {
        vec![PlugDescriptor::output("out", ValueType::Int)]
    }

    fn hash(
        &self,
        _output: &str,
        _scope: &mut dyn HashScope,
        hasher: &mut FingerprintHasher,
    ) -> Result<(), NodeError> {
        hasher.append_str(&self.message);
        Ok(())
    }

    fn compute(&self, _output: &str, _scope: &mut dyn ComputeScope) -> Result<Value, NodeError> {
        self.computes.fetch_add(1, Ordering::SeqCst);
        Err(NodeError::failed(self.message.clone()))
    }
}
