//! The `switch_` builder.

use std::collections::BTreeSet;

use inkwell::basic_block::BasicBlock;
use inkwell::values::{FunctionValue, IntValue};

use super::{Code, append_block, branch_target, enter_join};
use crate::constant::int_fits;
use crate::session::{LoopTargets, Session};
use crate::value::{IntoOperand, Value};
use crate::{Error, Result};

/// A `switch` under construction.
///
/// Cases are emitted as they are added; [`Switch::finish`] emits the
/// `switch` instruction itself. Case code falls through to the block after
/// the switch, which is also where `break_` inside a case goes. A switch
/// dropped without being finished is removed again.
#[must_use = "the switch instruction is only emitted by `finish`"]
#[derive(Debug)]
pub struct Switch {
    function: FunctionValue<'static>,
    scrutinee: Value,
    join: BasicBlock<'static>,
    keys: BTreeSet<i128>,
    cases: Vec<(IntValue<'static>, BasicBlock<'static>)>,
    default: Option<BasicBlock<'static>>,
    /// Blocks created for the cases, deleted if the switch is abandoned.
    created: Vec<BasicBlock<'static>>,
    finished: bool,
}

/// Starts a `switch` on the integer `scrutinee`.
pub fn switch_(scrutinee: impl IntoOperand) -> Result<Switch> {
    let session = Session::current();
    let function = session.function()?;
    session.emitter()?;
    let scrutinee = scrutinee.into_operand()?.resolve(None)?;
    if !scrutinee.ty().is_int() {
        return Err(Error::mismatch(format!("switch on {}", scrutinee.ty())));
    }
    let join = append_block(function, "switch.end");
    Ok(Switch {
        function,
        scrutinee,
        join,
        keys: BTreeSet::new(),
        cases: Vec::new(),
        default: None,
        created: vec![join],
        finished: false,
    })
}

impl Switch {
    fn target<'a>(&mut self, code: Code<'a>, name: &str) -> Result<BasicBlock<'static>> {
        let session = Session::current();
        let depth = session.push_loop(LoopTargets {
            function: self.function,
            break_to: self.join,
            continue_to: None,
        });
        let before = self.function.get_basic_blocks();
        let result = branch_target(code, name, self.join, self.join);
        session.pop_loop(depth);
        let fresh: Vec<_> = self
            .function
            .get_basic_blocks()
            .into_iter()
            .filter(|b| !before.contains(b) && !self.created.contains(b))
            .collect();
        self.created.extend(fresh);
        result
    }

    /// Adds `case key: code`.
    ///
    /// The key must fit the scrutinee's type and must not repeat.
    pub fn case_<'a>(mut self, key: impl Into<i128>, code: impl Into<Code<'a>>) -> Result<Self> {
        let key = key.into();
        let ty = self.scrutinee.ty();
        let bits = ty.int_width().unwrap_or(64);
        if !int_fits(key, bits, ty.leaf_unsigned()) {
            return Err(Error::LiteralOutOfRange {
                literal: key.to_string(),
                ty: ty.to_string(),
            });
        }
        if !self.keys.insert(key) {
            return Err(Error::DuplicateCase(key));
        }
        let value = ty.constant(key)?.llvm().into_int_value();
        let block = self.target(code.into(), "switch.case")?;
        self.cases.push((value, block));
        Ok(self)
    }

    /// Sets the code run when no case matches. Without one, control
    /// continues after the switch.
    pub fn default_<'a>(mut self, code: impl Into<Code<'a>>) -> Result<Self> {
        if self.default.is_some() {
            return Err(Error::bad_flow("switch already has a default"));
        }
        let block = self.target(code.into(), "switch.default")?;
        self.default = Some(block);
        Ok(self)
    }

    /// Emits the `switch` and continues after it.
    pub fn finish(mut self) -> Result<()> {
        let session = Session::current();
        let default = self.default.unwrap_or(self.join);
        session.emitter()?.build_switch(
            self.scrutinee.llvm().into_int_value(),
            default,
            &self.cases,
        )?;
        self.finished = true;
        enter_join(self.function, self.join)
    }
}

impl Drop for Switch {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let created = std::mem::take(&mut self.created);
        Session::current().delete_blocks(&created);
    }
}

#[cfg(test)]
mod test {
    use cool_asserts::assert_matches;
    use rstest::rstest;

    use super::*;
    use crate::decl::static_fn;
    use crate::flow::{Label, break_, goto_, return_};
    use crate::scope::Scope;
    use crate::symbols::{local, var};
    use crate::test::{TestContext, test_ctx};
    use crate::types::Type;

    #[rstest]
    fn cases_fall_through_to_the_end(test_ctx: TestContext) {
        let i32_t = Type::int(32);
        static_fn(i32_t.func(&[i32_t]).unwrap(), "pick", &["k"], || {
            let out = local(i32_t, "out")?;
            out.store(0)?;
            switch_(var("k"))?
                .case_(1, || out.store(10))?
                .case_(2, || -> Result<()> {
                    out.store(20)?;
                    break_()
                })?
                .finish()?;
            return_(&out)
        })
        .unwrap();
        test_ctx.module().verify().unwrap();
        let ir = test_ctx.module().llvm().print_to_string().to_string();
        assert!(ir.contains("switch i32"));
    }

    #[rstest]
    fn keys_are_checked(_test_ctx: TestContext) {
        static_fn(Type::void().func(&[Type::int(8)]).unwrap(), "keys", &["k"], || {
            let function = crate::scope::current_function().unwrap().function()?;
            let blocks = function.count_basic_blocks();
            assert_matches!(
                switch_(var("k"))?.case_(300, || ()),
                Err(Error::LiteralOutOfRange { .. })
            );
            assert_matches!(
                switch_(var("k"))?.case_(1, || ())?.case_(1, || ()),
                Err(Error::DuplicateCase(1))
            );
            assert_eq!(function.count_basic_blocks(), blocks);
            Ok(())
        })
        .unwrap();
    }

    #[rstest]
    fn abandoned_switch_forgets_label_blocks(test_ctx: TestContext) {
        let i32_t = Type::int(32);
        static_fn(i32_t.func(&[i32_t]).unwrap(), "abandon", &["k"], || {
            let function = crate::scope::current_function().unwrap().function()?;
            let blocks = function.count_basic_blocks();
            let target = Label::named("target");
            assert_matches!(
                switch_(var("k"))?.case_(1, &target)?.case_(1, || return_(0)),
                Err(Error::DuplicateCase(1))
            );
            assert!(target.basic_block().is_none());
            assert_eq!(function.count_basic_blocks(), blocks);
            goto_(&target)?;
            assert!(target.basic_block().is_some());
            let _s = Scope::label(&target)?;
            return_(3)
        })
        .unwrap();
        test_ctx.module().verify().unwrap();
    }

    #[rstest]
    fn switch_needs_an_integer(_test_ctx: TestContext) {
        static_fn(Type::void().func(&[]).unwrap(), "float_switch", &[], || {
            assert_matches!(switch_(1.5), Err(Error::TypeMismatch(_)));
            Ok(())
        })
        .unwrap();
    }
}
