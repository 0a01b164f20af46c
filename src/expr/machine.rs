//! The stack machine (§4.2): operand stack, local bindings, and the
//! `is_ended` flag. `Machine::run` interprets a `Vec<Opcode>` body.

use tracing::trace;

use crate::error::{ExprError, JoshResult};
use crate::sorted_vec_map::SortedVecMap;
use crate::value::{Value, ValueContext};

use super::opcode::Opcode;

/// Host callback surface the machine defers to for anything that needs
/// scheduler/entity context: resolving a dotted path, creating entities, and
/// running spatial queries (§4.2's `push(resolver)`, `create_entity`,
/// `execute_spatial_query`).
pub trait Resolver {
    fn resolve(&mut self, path: &str) -> JoshResult<Value>;
    fn create_entity(&mut self, type_name: &str, count: &Value) -> JoshResult<Value>;
    fn spatial_query(&mut self, resolver_path: &str, radius: &Value) -> JoshResult<Value>;
    fn set_state(&mut self, state: &str);
}

pub struct Machine {
    stack: Vec<Value>,
    locals: SortedVecMap<String, Value>,
    ended: bool,
    result: Option<Value>,
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

impl Machine {
    pub fn new() -> Self {
        Machine {
            stack: Vec::new(),
            locals: SortedVecMap::new(),
            ended: false,
            result: None,
        }
    }

    fn pop(&mut self) -> JoshResult<Value> {
        self.stack.pop().ok_or_else(|| ExprError::StackUnderflow.into())
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn get_result(&self) -> JoshResult<&Value> {
        self.result.as_ref().ok_or_else(|| ExprError::NoResult.into())
    }

    /// Runs `body` to completion against `resolver` and `value_ctx`, and
    /// returns the result value if one was produced before `end`/`condition`
    /// terminated the machine.
    pub fn run(
        &mut self,
        body: &[Opcode],
        resolver: &mut impl Resolver,
        value_ctx: &mut ValueContext,
    ) -> JoshResult<Option<Value>> {
        for op in body {
            if self.ended {
                break;
            }
            self.step(op, resolver, value_ctx)?;
        }
        Ok(self.result.clone())
    }

    fn step(&mut self, op: &Opcode, resolver: &mut impl Resolver, value_ctx: &mut ValueContext) -> JoshResult<()> {
        trace!(?op, "expr machine step");
        match op {
            Opcode::PushLiteral(v) => self.stack.push(v.clone()),
            Opcode::PushResolver(path) => {
                let v = resolver.resolve(path)?;
                self.stack.push(v);
            }
            Opcode::PushLocal(name) => {
                let v = self
                    .locals
                    .get(name)
                    .cloned()
                    .ok_or_else(|| ExprError::UnboundLocal(name.clone()))?;
                self.stack.push(v);
            }
            Opcode::SaveLocal(name) => {
                let v = self.pop()?;
                if self.locals.contains_key(name) {
                    return Err(ExprError::LocalAlreadyBound(name.clone()).into());
                }
                self.locals.insert(name.clone(), v);
            }
            Opcode::BinaryOp(op) => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                self.stack.push(lhs.binary_op(*op, &rhs, value_ctx)?);
            }
            Opcode::UnaryOp(op) => {
                let v = self.pop()?;
                self.stack.push(v.unary_op(*op)?);
            }
            Opcode::Reduce(r) => {
                let v = self.pop()?;
                self.stack.push(v.reduce(*r, value_ctx)?);
            }
            Opcode::Cast { unit, force } => {
                let v = self.pop()?;
                self.stack.push(v.cast(unit, value_ctx.graph, *force)?);
            }
            Opcode::Concat => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                self.stack.push(lhs.concat(&rhs)?);
            }
            Opcode::Bound { lower, upper } => {
                let v = self.pop()?;
                self.stack.push(v.bound(*lower, *upper)?);
            }
            Opcode::Map { from_lo, from_hi, to_lo, to_hi, method, steep } => {
                let v = self.pop()?;
                self.stack.push(v.map(*from_lo, *from_hi, *to_lo, *to_hi, *method, *steep)?);
            }
            Opcode::Sample { n, with_replacement } => {
                let v = self.pop()?;
                self.stack.push(v.sample(*n, *with_replacement, &mut *value_ctx.rng.borrow_mut())?);
            }
            Opcode::RandUniform { lo, hi, unit } => {
                self.stack
                    .push(Value::Distribution(crate::value::Distribution::uniform(*lo, *hi, unit.clone())));
            }
            Opcode::RandNorm { mean, std, unit } => {
                self.stack
                    .push(Value::Distribution(crate::value::Distribution::normal(*mean, *std, unit.clone())));
            }
            Opcode::Condition { action } => {
                let cond = self.pop()?.as_scalar()?.as_bool()?;
                if cond {
                    for inner in action {
                        if self.ended {
                            break;
                        }
                        self.step(inner, resolver, value_ctx)?;
                    }
                } else {
                    self.ended = true;
                }
            }
            Opcode::Branch { positive, negative } => {
                let cond = self.pop()?.as_scalar()?.as_bool()?;
                let branch = if cond { positive } else { negative };
                for inner in branch {
                    if self.ended {
                        break;
                    }
                    self.step(inner, resolver, value_ctx)?;
                }
            }
            Opcode::CreateEntity { type_name } => {
                let count = self.pop()?;
                let created = resolver.create_entity(type_name, &count)?;
                self.stack.push(created);
            }
            Opcode::ExecuteSpatialQuery { resolver: path } => {
                let radius = self.pop()?;
                let result = resolver.spatial_query(path, &radius)?;
                self.stack.push(result);
            }
            Opcode::SetState(state) => {
                resolver.set_state(state);
            }
            Opcode::End => {
                if let Some(top) = self.stack.last() {
                    self.result = Some(top.clone());
                }
                self.ended = true;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::{ConversionGraph, Unit};
    use crate::value::{BinOp, Scalar};
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rust_decimal_macros::dec;
    use std::cell::RefCell;

    struct NoopResolver;
    impl Resolver for NoopResolver {
        fn resolve(&mut self, _path: &str) -> JoshResult<Value> {
            Err(ExprError::UnboundLocal("unused".into()).into())
        }
        fn create_entity(&mut self, _type_name: &str, _count: &Value) -> JoshResult<Value> {
            unimplemented!("not exercised in this test")
        }
        fn spatial_query(&mut self, _resolver_path: &str, _radius: &Value) -> JoshResult<Value> {
            unimplemented!("not exercised in this test")
        }
        fn set_state(&mut self, _state: &str) {}
    }

    #[test]
    fn stack_underflow_on_empty_pop() {
        let mut machine = Machine::new();
        let graph = ConversionGraph::new();
        let rng = RefCell::new(StdRng::seed_from_u64(0));
        let mut ctx = ValueContext {
            graph: &graph,
            rng: &rng,
            sample_size: 10,
        };
        let body = vec![Opcode::BinaryOp(BinOp::Add)];
        let mut resolver = NoopResolver;
        assert!(machine.run(&body, &mut resolver, &mut ctx).is_err());
    }

    #[test]
    fn push_add_end_produces_a_result() {
        let mut machine = Machine::new();
        let graph = ConversionGraph::new();
        let rng = RefCell::new(StdRng::seed_from_u64(0));
        let mut ctx = ValueContext {
            graph: &graph,
            rng: &rng,
            sample_size: 10,
        };
        let body = vec![
            Opcode::PushLiteral(Value::Scalar(Scalar::decimal(dec!(1), Unit::base("year")))),
            Opcode::PushLiteral(Value::Scalar(Scalar::decimal(dec!(1), Unit::base("year")))),
            Opcode::BinaryOp(BinOp::Add),
            Opcode::End,
        ];
        let mut resolver = NoopResolver;
        let result = machine.run(&body, &mut resolver, &mut ctx).unwrap();
        assert_eq!(result, Some(Value::Scalar(Scalar::decimal(dec!(2), Unit::base("year")))));
        assert!(machine.is_ended());
    }

    #[test]
    fn condition_false_ends_without_result() {
        let mut machine = Machine::new();
        let graph = ConversionGraph::new();
        let rng = RefCell::new(StdRng::seed_from_u64(0));
        let mut ctx = ValueContext {
            graph: &graph,
            rng: &rng,
            sample_size: 10,
        };
        let body = vec![
            Opcode::PushLiteral(Value::Scalar(Scalar::boolean(false))),
            Opcode::Condition {
                action: vec![Opcode::PushLiteral(Value::Scalar(Scalar::count(1))), Opcode::End],
            },
        ];
        let mut resolver = NoopResolver;
        let result = machine.run(&body, &mut resolver, &mut ctx).unwrap();
        assert_eq!(result, None);
        assert!(machine.is_ended());
    }
}
