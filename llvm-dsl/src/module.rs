//! The [Module] wrapper: symbol lookup, file I/O, linking, optimization and
//! JIT compilation.

use std::cell::{Cell, OnceCell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::io::{Read, Write};
use std::path::Path;
use std::rc::Rc;

use indexmap::IndexSet;
use inkwell::OptimizationLevel;
use inkwell::execution_engine::{ExecutionEngine, JitFunction, UnsafeFunctionPointer};
use inkwell::memory_buffer::MemoryBuffer;
use inkwell::module::Linkage;
use inkwell::passes::{PassManager, PassManagerBuilder};
use inkwell::types::AnyType;
use tracing::debug;

use crate::reference::Ref;
use crate::session::Session;
use crate::symbols::SymbolName;
use crate::types::{HostSignature, Type};
use crate::{Error, Result};

const BITCODE_MAGIC: &[u8] = b"BC\xC0\xDE";
const BITCODE_WRAPPER_MAGIC: &[u8] = &[0xDE, 0xC0, 0x17, 0x0B];

/// A standard optimization pipeline.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::EnumIter,
)]
#[non_exhaustive]
pub enum OptLevel {
    /// No optimization.
    #[default]
    #[strum(serialize = "0")]
    None,
    /// `-O1`
    #[strum(serialize = "1")]
    Less,
    /// `-O2`
    #[strum(serialize = "2")]
    Default,
    /// `-O3`
    #[strum(serialize = "3")]
    Aggressive,
    /// `-Os`: `-O2` favouring size.
    #[strum(serialize = "s")]
    Size,
    /// `-Oz`: size at any cost.
    #[strum(serialize = "z")]
    MinSize,
}

impl OptLevel {
    fn pipeline(self) -> Option<(OptimizationLevel, u32, Option<u32>)> {
        use OptimizationLevel as O;
        match self {
            OptLevel::None => None,
            OptLevel::Less => Some((O::Less, 0, None)),
            OptLevel::Default => Some((O::Default, 0, Some(225))),
            OptLevel::Aggressive => Some((O::Aggressive, 0, Some(275))),
            OptLevel::Size => Some((O::Default, 1, Some(75))),
            OptLevel::MinSize => Some((O::Default, 2, Some(25))),
        }
    }
}

struct ModuleData {
    module: inkwell::module::Module<'static>,
    /// Signed types of the globals declared through this crate.
    globals: RefCell<HashMap<String, Type>>,
    /// Symbols declared with flexible names; linking renames them on collision.
    flexible: RefCell<IndexSet<String>>,
    jit: OnceCell<ExecutionEngine<'static>>,
    jit_level: Cell<OptimizationLevel>,
}

/// An IR module.
///
/// Cloning yields another handle to the same module.
#[derive(Clone)]
pub struct Module(Rc<ModuleData>);

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Module").field(&self.name()).finish()
    }
}

impl PartialEq for Module {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Module {
    /// An empty module in the current session's context.
    pub fn new(name: &str) -> Module {
        Module::from_llvm(Session::current().context().create_module(name))
    }

    /// Wraps an existing LLVM module, which must belong to the current
    /// session's context.
    pub fn from_llvm(module: inkwell::module::Module<'static>) -> Module {
        Module(Rc::new(ModuleData {
            module,
            globals: RefCell::default(),
            flexible: RefCell::default(),
            jit: OnceCell::new(),
            jit_level: Cell::new(OptimizationLevel::None),
        }))
    }

    /// The wrapped LLVM module.
    pub fn llvm(&self) -> &inkwell::module::Module<'static> {
        &self.0.module
    }

    /// The module identifier.
    pub fn name(&self) -> String {
        self.0.module.get_name().to_string_lossy().into_owned()
    }

    /// The function or global variable called `name`.
    ///
    /// Globals keep the signedness they were declared with; symbols that
    /// came from elsewhere are taken to be signed.
    pub fn symbol(&self, name: &str) -> Option<Ref> {
        if let Some(function) = self.0.module.get_function(name) {
            return Some(Ref::from_function(function));
        }
        let global = self.0.module.get_global(name)?;
        let ty = self.0.globals.borrow().get(name).copied().unwrap_or_else(|| {
            Type::from_llvm(global.as_pointer_value().get_type().get_element_type())
        });
        Some(Ref::global(global, ty))
    }

    /// The names of all functions, then of all global variables.
    pub fn symbol_names(&self) -> Vec<String> {
        let functions = self
            .0
            .module
            .get_functions()
            .map(|f| f.get_name().to_string_lossy().into_owned());
        let globals = self
            .0
            .module
            .get_globals()
            .map(|g| g.get_name().to_string_lossy().into_owned());
        functions.chain(globals).collect()
    }

    pub(crate) fn is_taken(&self, name: &str) -> bool {
        self.0.module.get_function(name).is_some() || self.0.module.get_global(name).is_some()
    }

    pub(crate) fn register_function(&self, name: &str, flexible: bool) {
        if flexible {
            self.0.flexible.borrow_mut().insert(name.to_owned());
        }
    }

    pub(crate) fn register_global(&self, name: &str, ty: Type, flexible: bool) {
        self.0.globals.borrow_mut().insert(name.to_owned(), ty);
        self.register_function(name, flexible);
    }

    // ----- files -----

    /// Reads a module from a bitcode or textual IR file.
    pub fn read(path: impl AsRef<Path>) -> Result<Module> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        Module::parse(&bytes, &path.display().to_string())
    }

    /// Reads a module in bitcode or textual IR from `reader`.
    pub fn read_from(mut reader: impl Read) -> Result<Module> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Module::parse(&bytes, "<stream>")
    }

    /// Parses bitcode or textual IR, told apart by the bitcode magic.
    pub fn parse(bytes: &[u8], name: &str) -> Result<Module> {
        let context = Session::current().context();
        let buffer = MemoryBuffer::create_from_memory_range_copy(bytes, name);
        let bitcode = bytes.starts_with(BITCODE_MAGIC) || bytes.starts_with(BITCODE_WRAPPER_MAGIC);
        let module = if bitcode {
            inkwell::module::Module::parse_bitcode_from_buffer(&buffer, context)
        } else {
            context.create_module_from_ir(buffer)
        }
        .map_err(|e| Error::Io(format!("{name}: {}", e.to_string().trim())))?;
        debug!(name, bitcode, "read module");
        Ok(Module::from_llvm(module))
    }

    /// Writes the module to `path`, as bitcode if `binary` is set and as
    /// textual IR otherwise.
    pub fn write(&self, path: impl AsRef<Path>, binary: bool) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_bytes(binary))?;
        debug!(path = %path.display(), binary, "wrote module");
        Ok(())
    }

    /// Writes the module to `writer`. See [`Module::write`].
    pub fn write_to(&self, mut writer: impl Write, binary: bool) -> Result<()> {
        writer.write_all(&self.to_bytes(binary))?;
        debug!(binary, "wrote module");
        Ok(())
    }

    /// The module as bitcode or textual IR.
    pub fn to_bytes(&self, binary: bool) -> Vec<u8> {
        if binary {
            self.0.module.write_bitcode_to_memory().as_slice().to_vec()
        } else {
            self.0.module.print_to_string().to_bytes().to_vec()
        }
    }

    // ----- transformations -----

    /// Runs the LLVM verifier.
    pub fn verify(&self) -> Result<()> {
        self.0
            .module
            .verify()
            .map_err(|e| Error::VerifierRejected(e.to_string().trim().to_owned()))
    }

    /// Links a copy of `other` into this module.
    ///
    /// Incoming symbols that were declared with flexible names are renamed
    /// when they collide with a symbol of this module; any other collision
    /// is left to the linker, which accepts declarations meeting their
    /// definition and rejects two definitions.
    pub fn link(&self, other: &Module) -> Result<()> {
        if self == other {
            return Err(Error::Io(format!("cannot link {} into itself", self.name())));
        }
        let session = Session::current();
        let incoming = other.0.module.clone();
        let mut renamed = HashMap::new();
        for name in other.0.flexible.borrow().iter() {
            if !self.is_taken(name) {
                continue;
            }
            let fresh = SymbolName::flexible(name.as_str()).resolve(|n| {
                self.is_taken(n) || incoming.get_function(n).is_some() || incoming.get_global(n).is_some()
            })?;
            if let Some(f) = incoming.get_function(name) {
                f.as_global_value().as_pointer_value().set_name(&fresh);
            } else if let Some(g) = incoming.get_global(name) {
                g.as_pointer_value().set_name(&fresh);
            }
            renamed.insert(name.clone(), fresh);
        }
        let carried: Vec<_> = other
            .0
            .module
            .get_functions()
            .map(|f| {
                let name = f.get_name().to_string_lossy().into_owned();
                let name = renamed.get(&name).cloned().unwrap_or(name);
                (name, session.signature(f), session.parameter_names(f))
            })
            .collect();

        self.0
            .module
            .link_in_module(incoming)
            .map_err(|e| Error::Io(format!("linking {}: {}", other.name(), e.to_string().trim())))?;

        for (name, signature, params) in carried {
            let Some(f) = self.0.module.get_function(&name) else {
                continue;
            };
            if let Some(signature) = signature {
                session.set_signature(f, signature);
            }
            if !params.is_empty() {
                session.set_parameter_names(f, params);
            }
        }
        let rename = |n: &String| renamed.get(n).cloned().unwrap_or_else(|| n.clone());
        for (name, ty) in other.0.globals.borrow().iter() {
            self.0.globals.borrow_mut().insert(rename(name), *ty);
        }
        for name in other.0.flexible.borrow().iter() {
            self.0.flexible.borrow_mut().insert(rename(name));
        }
        // The linker drops unreferenced declarations and internal symbols.
        self.0.globals.borrow_mut().retain(|n, _| self.is_taken(n));
        self.0.flexible.borrow_mut().retain(|n| self.is_taken(n));
        debug!(into = %self.name(), from = %other.name(), renamed = renamed.len(), "linked module");
        Ok(())
    }

    /// Runs the standard pipeline for `level`.
    pub fn optimize(&self, level: OptLevel) -> Result<()> {
        let Some((opt, size, inline_threshold)) = level.pipeline() else {
            return Ok(());
        };
        let builder = PassManagerBuilder::create();
        builder.set_optimization_level(opt);
        builder.set_size_level(size);
        if let Some(threshold) = inline_threshold {
            builder.set_inliner_with_threshold(threshold);
        }

        let function_passes = PassManager::create(&self.0.module);
        builder.populate_function_pass_manager(&function_passes);
        function_passes.initialize();
        for function in self.0.module.get_functions() {
            function_passes.run_on(&function);
        }
        function_passes.finalize();

        let module_passes = PassManager::create(());
        if inline_threshold.is_none() {
            module_passes.add_always_inliner_pass();
        }
        builder.populate_module_pass_manager(&module_passes);
        module_passes.run_on(&self.0.module);
        debug!(module = %self.name(), %level, "optimized module");
        Ok(())
    }

    // ----- JIT -----

    /// The code generation level of the JIT. Only takes effect before the
    /// first [`Module::compile`].
    pub fn set_jit_opt_level(&self, level: OptimizationLevel) {
        self.0.jit_level.set(level);
    }

    /// JIT-compiles the function `name` and returns it as an `F`.
    ///
    /// `F` must be an `unsafe extern "C" fn` whose IR signature is the type
    /// of the function. The module is verified first. The JIT engine is
    /// created on the first call and takes the module as it is then, with
    /// internal definitions made external; functions added later cannot be
    /// compiled.
    pub fn compile<F>(&self, name: &str) -> Result<JitFunction<'static, F>>
    where
        F: UnsafeFunctionPointer + HostSignature,
    {
        let function = self
            .0
            .module
            .get_function(name)
            .ok_or_else(|| Error::NameNotFound(name.to_owned()))?;
        let expected = F::signature()?;
        let actual = function.get_type().as_any_type_enum();
        if expected.llvm() != actual {
            return Err(Error::SignatureMismatch(format!(
                "{name} has type {}, requested {expected}",
                actual.print_to_string().to_string()
            )));
        }
        if function.count_basic_blocks() == 0 {
            return Err(Error::SignatureMismatch(format!("{name} has no body")));
        }
        let engine = self.engine(|| {
            for f in self.0.module.get_functions() {
                let local = matches!(f.get_linkage(), Linkage::Internal | Linkage::Private);
                if local && f.count_basic_blocks() > 0 {
                    f.set_linkage(Linkage::External);
                }
            }
        })?;
        debug!(module = %self.name(), name, "compiled function");
        // SAFETY: the signature of `F` was checked against the IR function type.
        unsafe { engine.get_function::<F>(name) }.map_err(|e| Error::Llvm(e.to_string()))
    }

    fn engine(&self, before: impl FnOnce()) -> Result<&ExecutionEngine<'static>> {
        if let Some(engine) = self.0.jit.get() {
            return Ok(engine);
        }
        self.verify()?;
        Session::current().native()?;
        before();
        let engine = self
            .0
            .module
            .create_jit_execution_engine(self.0.jit_level.get())?;
        debug!(module = %self.name(), "created JIT engine");
        Ok(self.0.jit.get_or_init(|| engine))
    }
}

#[cfg(test)]
mod test {
    use cool_asserts::assert_matches;
    use rstest::rstest;
    use strum::IntoEnumIterator as _;

    use super::*;
    use crate::decl::{declare_fn, extern_, extern_fn, static_};
    use crate::flow::return_;
    use crate::symbols::{flexible, var};
    use crate::test::{TestContext, test_ctx};

    fn add_one(ty: Type) -> Result<()> {
        extern_fn(ty, "add_one", &["x"], || return_(&var("x")? + 1)).map(drop)
    }

    #[test]
    fn opt_levels_parse() {
        for level in OptLevel::iter() {
            assert_eq!(level.to_string().parse::<OptLevel>().unwrap(), level);
        }
        assert_eq!("z".parse::<OptLevel>().unwrap(), OptLevel::MinSize);
        assert!("4".parse::<OptLevel>().is_err());
    }

    #[rstest]
    fn symbols(test_ctx: TestContext) {
        let module = test_ctx.module();
        static_(Type::uint(8), "byte").unwrap();
        declare_fn(Type::void().func(&[]).unwrap(), "f").unwrap();
        assert_eq!(module.symbol_names(), ["f", "byte"]);
        assert_eq!(module.symbol("byte").unwrap().ty(), Type::uint(8));
        assert!(module.symbol("f").unwrap().function().is_ok());
        assert!(module.symbol("g").is_none());
    }

    #[rstest]
    #[case::text(false)]
    #[case::bitcode(true)]
    fn files(test_ctx: TestContext, #[case] binary: bool) {
        add_one(Type::int(32).func(&[Type::int(32)]).unwrap()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.out");
        test_ctx.module().write(&path, binary).unwrap();
        let read = Module::read(&path).unwrap();
        assert!(read.llvm().get_function("add_one").is_some());
        read.verify().unwrap();

        let mut buffer = Vec::new();
        test_ctx.module().write_to(&mut buffer, binary).unwrap();
        assert_eq!(buffer.starts_with(BITCODE_MAGIC), binary);
        let reread = Module::read_from(buffer.as_slice()).unwrap();
        assert!(reread.symbol("add_one").is_some());
    }

    #[rstest]
    fn unreadable_input(_test_ctx: TestContext) {
        assert_matches!(Module::parse(b"not ir at all", "junk"), Err(Error::Io(_)));
        assert_matches!(
            Module::read("/nonexistent/module.ll"),
            Err(Error::Io(_))
        );
    }

    #[rstest]
    fn linking_renames_flexible_symbols(test_ctx: TestContext) {
        let i32_t = Type::int(32);
        extern_(i32_t, flexible("counter")).unwrap();
        let other = Module::new("other");
        {
            let _scope = crate::Scope::module(&other);
            let counter = extern_(Type::uint(16), flexible("counter")).unwrap();
            let state = static_(i32_t, "private_state").unwrap();
            extern_(i32_t, flexible("unused")).unwrap();
            extern_fn(Type::uint(16).func(&[]).unwrap(), "read_counter", &[], || {
                state.store(1)?;
                return_(&counter)
            })
            .unwrap();
        }
        let module = test_ctx.module();
        module.link(&other).unwrap();
        assert_eq!(module.symbol("counter.1").unwrap().ty(), Type::uint(16));
        assert_eq!(module.symbol("counter").unwrap().ty(), i32_t);
        assert!(module.symbol("private_state").is_some());
        assert!(module.symbol("unused").is_none());
        assert!(!module.0.globals.borrow().contains_key("unused"));
        assert!(!module.0.flexible.borrow().contains("unused"));
        module.verify().unwrap();
    }

    #[rstest]
    fn linking_rejects_two_definitions(test_ctx: TestContext) {
        let ty = Type::int(32).func(&[Type::int(32)]).unwrap();
        add_one(ty).unwrap();
        let other = Module::new("other");
        {
            let _scope = crate::Scope::module(&other);
            add_one(ty).unwrap();
        }
        assert_matches!(test_ctx.module().link(&other), Err(Error::Io(_)));
    }

    #[rstest]
    fn compile_checks_the_signature(test_ctx: TestContext) {
        let i32_t = Type::int(32);
        add_one(i32_t.func(&[i32_t]).unwrap()).unwrap();
        let module = test_ctx.module();
        module.optimize(OptLevel::Default).unwrap();
        module.verify().unwrap();
        assert_matches!(
            module.compile::<unsafe extern "C" fn(i64) -> i64>("add_one"),
            Err(Error::SignatureMismatch(_))
        );
        assert_matches!(
            module.compile::<unsafe extern "C" fn() -> i32>("missing"),
            Err(Error::NameNotFound(_))
        );
        let f = module.compile::<unsafe extern "C" fn(i32) -> i32>("add_one").unwrap();
        assert_eq!(unsafe { f.call(41) }, 42);
    }

    #[rstest]
    fn compile_verifies_first(test_ctx: TestContext) {
        let ty = Type::int(32).func(&[]).unwrap();
        let f = declare_fn(ty, "broken").unwrap();
        {
            let _body = crate::Scope::function(&f).unwrap();
        }
        assert_matches!(
            test_ctx.module().compile::<unsafe extern "C" fn() -> i32>("broken"),
            Err(Error::VerifierRejected(_))
        );
    }
}
