//! Stack-layout-aware invocation thunks for typed operator functions.
//!
//! Children are stored left to right in pre-order and evaluated by a
//! reverse walk, so an operator finds argument 0 on top of the stack and its
//! last argument deepest. The thunks generated here read each argument at
//! its offset from the top, discard the argument region, call the function
//! and push the result. One impl per arity is stamped out by a macro.

use crate::error::StackError;
use crate::stack::ValueStack;
use crate::types::{TypeDescriptor, Value, stored_size};

/// Erased call of a non-ephemeral operator: consumes its arguments from the
/// stack and pushes its result.
pub type Invoker<Ctx> = Box<dyn Fn(&Ctx, &mut ValueStack) + Send + Sync>;

/// Argument and return types of an operator function.
#[derive(Debug, Clone)]
pub struct Signature {
    pub(crate) arguments: Vec<TypeDescriptor>,
    pub(crate) ret: TypeDescriptor,
}

impl Signature {
    /// Number of stack arguments.
    #[must_use]
    pub fn argc(&self) -> usize {
        self.arguments.len()
    }

    /// Rust name of the return type.
    #[must_use]
    pub fn return_type_name(&self) -> &'static str {
        self.ret.name
    }
}

/// A plain function usable as an operator: `Fn(A0, A1, ..) -> R`.
pub trait OperatorFn<Args, Ret>: Send + Sync + Sized + 'static {
    /// Types consumed and produced.
    fn signature() -> Signature;
    /// Wrap the function in a stack thunk.
    fn into_invoker<Ctx: 'static>(self) -> Invoker<Ctx>;
}

/// A function that also reads the evaluation context: `Fn(&Ctx, A0, ..) -> R`.
pub trait ContextOperatorFn<Ctx, Args, Ret>: Send + Sync + Sized + 'static {
    /// Types consumed from the stack and produced.
    fn signature() -> Signature;
    /// Wrap the function in a stack thunk that passes the context through.
    fn into_invoker(self) -> Invoker<Ctx>;
}

/// Abort on a broken stack layout; the evaluator guarantees arguments exist.
#[cold]
pub(crate) fn invariant_violation(e: StackError) -> ! {
    panic!("evaluation stack invariant violated: {e}")
}

macro_rules! impl_operator_fn {
    ($(($ty:ident, $val:ident)),*) => {
        impl<Func, Ret, $($ty,)*> OperatorFn<($($ty,)*), Ret> for Func
        where
            Func: Fn($($ty),*) -> Ret + Send + Sync + 'static,
            Ret: Value,
            $($ty: Value,)*
        {
            fn signature() -> Signature {
                Signature {
                    arguments: vec![$(TypeDescriptor::of::<$ty>()),*],
                    ret: TypeDescriptor::of::<Ret>(),
                }
            }

            #[allow(unused_mut, unused_variables, unused_assignments)]
            fn into_invoker<Ctx: 'static>(self) -> Invoker<Ctx> {
                Box::new(move |_: &Ctx, stack: &mut ValueStack| {
                    let total = 0usize $(+ stored_size::<$ty>())*;
                    let mut offset = 0usize;
                    $(
                        // SAFETY: the evaluator left one value per argument type, argument 0 on top.
                        let $val = unsafe { stack.take::<$ty>(offset) }
                            .unwrap_or_else(|e| invariant_violation(e));
                        offset += stored_size::<$ty>();
                    )*
                    stack.pop_bytes(total).unwrap_or_else(|e| invariant_violation(e));
                    stack.push((self)($($val),*));
                })
            }
        }

        impl<Ctx, Func, Ret, $($ty,)*> ContextOperatorFn<Ctx, ($($ty,)*), Ret> for Func
        where
            Ctx: 'static,
            Func: Fn(&Ctx, $($ty),*) -> Ret + Send + Sync + 'static,
            Ret: Value,
            $($ty: Value,)*
        {
            fn signature() -> Signature {
                Signature {
                    arguments: vec![$(TypeDescriptor::of::<$ty>()),*],
                    ret: TypeDescriptor::of::<Ret>(),
                }
            }

            #[allow(unused_mut, unused_variables, unused_assignments)]
            fn into_invoker(self) -> Invoker<Ctx> {
                Box::new(move |ctx: &Ctx, stack: &mut ValueStack| {
                    let total = 0usize $(+ stored_size::<$ty>())*;
                    let mut offset = 0usize;
                    $(
                        // SAFETY: the evaluator left one value per argument type, argument 0 on top.
                        let $val = unsafe { stack.take::<$ty>(offset) }
                            .unwrap_or_else(|e| invariant_violation(e));
                        offset += stored_size::<$ty>();
                    )*
                    stack.pop_bytes(total).unwrap_or_else(|e| invariant_violation(e));
                    stack.push((self)(ctx, $($val),*));
                })
            }
        }
    };
}

impl_operator_fn!();
impl_operator_fn!((A0, a0));
impl_operator_fn!((A0, a0), (A1, a1));
impl_operator_fn!((A0, a0), (A1, a1), (A2, a2));
impl_operator_fn!((A0, a0), (A1, a1), (A2, a2), (A3, a3));
impl_operator_fn!((A0, a0), (A1, a1), (A2, a2), (A3, a3), (A4, a4));
impl_operator_fn!((A0, a0), (A1, a1), (A2, a2), (A3, a3), (A4, a4), (A5, a5));

#[cfg(test)]
mod tests {
    use super::*;

    fn invoke<F: OperatorFn<Args, Ret>, Args, Ret>(f: F, stack: &mut ValueStack) {
        let thunk = f.into_invoker::<()>();
        thunk(&(), stack);
    }

    #[test]
    fn test_argument_order() {
        let mut stack = ValueStack::new();
        // The last argument is pushed first.
        stack.push(4.0f32);
        stack.push(10.0f32);
        invoke(|a: f32, b: f32| a - b, &mut stack);
        let result = unsafe { stack.pop::<f32>() }.unwrap();
        assert!((result - 6.0).abs() < f32::EPSILON);
        assert!(stack.is_empty());
    }

    #[test]
    fn test_mixed_argument_sizes() {
        let mut stack = ValueStack::new();
        stack.push(3u8);
        stack.push([1.0f64, 2.0]);
        stack.push(true);
        invoke(
            |flag: bool, pair: [f64; 2], k: u8| {
                if flag { pair[0] + pair[1] * f64::from(k) } else { 0.0 }
            },
            &mut stack,
        );
        let result = unsafe { stack.pop::<f64>() }.unwrap();
        assert!((result - 7.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_context_operator() {
        struct Ctx {
            x: f32,
        }
        let thunk = ContextOperatorFn::<Ctx, (f32,), f32>::into_invoker(|ctx: &Ctx, y: f32| ctx.x * y);
        let mut stack = ValueStack::new();
        stack.push(3.0f32);
        thunk(&Ctx { x: 2.0 }, &mut stack);
        let result = unsafe { stack.pop::<f32>() }.unwrap();
        assert!((result - 6.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_signature() {
        fn sig<F: OperatorFn<Args, Ret>, Args, Ret>(_: &F) -> Signature {
            F::signature()
        }
        let s = sig(&|a: bool, b: f32, c: f32| if a { b } else { c });
        assert_eq!(s.argc(), 3);
        assert_eq!(s.return_type_name(), "f32");
    }
}
