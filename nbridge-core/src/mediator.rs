//! Foreign access mediator.
//!
//! Foreign callers can only send five kinds of message: read an element,
//! write an element, ask for the size, ask for a pointer, or call something
//! as a function. The mediator checks each message against what the
//! receiver can do and routes it to the vector, the function, or the
//! pointer identity registry.

use std::fmt;
use std::sync::Arc;

use crate::registry::{MirrorRef, MirrorRegistry};
use crate::types::{BridgeConfig, Scalar};
use crate::vector::AnyVector;
use crate::BridgeError;

/// A value passed to or returned from a foreign function.
#[derive(Debug, Clone, PartialEq)]
pub enum ForeignValue {
    Null,
    Scalar(Scalar),
    /// A native or registry address.
    Address(usize),
}

type FunctionBody = dyn Fn(&[ForeignValue]) -> Result<ForeignValue, BridgeError> + Send + Sync;

/// A function receiver: something foreign code may call.
pub struct ForeignFunction {
    name: String,
    body: Box<FunctionBody>,
}

impl ForeignFunction {
    pub fn new<F>(name: impl Into<String>, body: F) -> Arc<Self>
    where
        F: Fn(&[ForeignValue]) -> Result<ForeignValue, BridgeError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            name: name.into(),
            body: Box::new(body),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, args: &[ForeignValue]) -> Result<ForeignValue, BridgeError> {
        log::trace!("calling foreign function {} with {} args", self.name, args.len());
        (self.body)(args)
    }
}

impl fmt::Debug for ForeignFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignFunction")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl crate::registry::MirrorTarget for ForeignFunction {
    fn into_any(self: Arc<Self>) -> Arc<dyn std::any::Any + Send + Sync> {
        self
    }
}

/// What a receiver can be asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Read,
    Write,
    Size,
    Pointer,
    Execute,
}

/// The object a message is sent to.
#[derive(Debug)]
pub enum Receiver {
    Vector(AnyVector),
    Function(Arc<ForeignFunction>),
    /// An object known only by its registry identity.
    Pointer(MirrorRef),
}

impl Receiver {
    pub fn name(&self) -> &'static str {
        match self {
            Receiver::Vector(_) => "vector",
            Receiver::Function(_) => "function",
            Receiver::Pointer(_) => "pointer",
        }
    }

    pub fn supports(&self, capability: Capability) -> bool {
        use Capability::*;
        match (self, capability) {
            (Receiver::Vector(_), Read | Write | Size | Pointer) => true,
            (Receiver::Vector(_), Execute) => false,
            (Receiver::Function(_), Execute | Pointer) => true,
            (Receiver::Function(_), Read | Write | Size) => false,
            (Receiver::Pointer(_), Pointer) => true,
            (Receiver::Pointer(_), Read | Write | Size | Execute) => false,
        }
    }

    pub fn capabilities(&self) -> Vec<Capability> {
        [
            Capability::Read,
            Capability::Write,
            Capability::Size,
            Capability::Pointer,
            Capability::Execute,
        ]
        .into_iter()
        .filter(|c| self.supports(*c))
        .collect()
    }

    pub fn as_vector(&self) -> Option<&AnyVector> {
        match self {
            Receiver::Vector(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_vector(self) -> Option<AnyVector> {
        match self {
            Receiver::Vector(v) => Some(v),
            _ => None,
        }
    }
}

impl From<AnyVector> for Receiver {
    fn from(vector: AnyVector) -> Self {
        Receiver::Vector(vector)
    }
}

impl From<Arc<ForeignFunction>> for Receiver {
    fn from(function: Arc<ForeignFunction>) -> Self {
        Receiver::Function(function)
    }
}

impl From<MirrorRef> for Receiver {
    fn from(mirror: MirrorRef) -> Self {
        Receiver::Pointer(mirror)
    }
}

/// One foreign operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    ReadElement(usize),
    WriteElement(usize, Scalar),
    GetSize,
    ConvertToPointer,
    ExecuteAsFunction(Vec<ForeignValue>),
}

impl Message {
    pub fn name(&self) -> &'static str {
        match self {
            Message::ReadElement(_) => "read_element",
            Message::WriteElement(..) => "write_element",
            Message::GetSize => "get_size",
            Message::ConvertToPointer => "convert_to_pointer",
            Message::ExecuteAsFunction(_) => "execute_as_function",
        }
    }

    pub fn capability(&self) -> Capability {
        match self {
            Message::ReadElement(_) => Capability::Read,
            Message::WriteElement(..) => Capability::Write,
            Message::GetSize => Capability::Size,
            Message::ConvertToPointer => Capability::Pointer,
            Message::ExecuteAsFunction(_) => Capability::Execute,
        }
    }
}

/// Result of a successfully handled message.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Element(Scalar),
    Written,
    Size(usize),
    Pointer(usize),
    Value(ForeignValue),
}

/// Routes foreign messages to receivers.
#[derive(Debug, Clone)]
pub struct Mediator {
    config: BridgeConfig,
    registry: Arc<MirrorRegistry>,
}

impl Mediator {
    /// A mediator using the process-wide registry. Also applies the
    /// config's memory-check setting process-wide.
    pub fn new(config: BridgeConfig) -> Self {
        crate::helpers::set_memory_check(config.memory_check);
        let registry = MirrorRegistry::init_global(config.registry_initial_capacity);
        Self { config, registry }
    }

    /// A mediator with its own registry.
    pub fn with_registry(config: BridgeConfig, registry: Arc<MirrorRegistry>) -> Self {
        Self { config, registry }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<MirrorRegistry> {
        &self.registry
    }

    /// Deliver `message` to `receiver`.
    pub fn send(&self, receiver: &mut Receiver, message: Message) -> Result<Reply, BridgeError> {
        if !receiver.supports(message.capability()) {
            log::debug!("{} sent to {} receiver", message.name(), receiver.name());
            return Err(BridgeError::capability_mismatch(
                receiver.name(),
                message.name(),
            ));
        }

        match (receiver, message) {
            (Receiver::Vector(vector), Message::ReadElement(index)) => {
                check_index(index, vector.len())?;
                vector.get(index).map(Reply::Element)
            }
            (Receiver::Vector(vector), Message::WriteElement(index, value)) => {
                check_index(index, vector.len())?;
                if value.kind() != vector.kind() {
                    return Err(BridgeError::type_mismatch(vector.kind(), value.kind()));
                }
                vector.set(index, value).map(|_| Reply::Written)
            }
            (Receiver::Vector(vector), Message::GetSize) => Ok(Reply::Size(vector.len())),
            (receiver, Message::ConvertToPointer) => self.to_pointer(receiver).map(Reply::Pointer),
            (Receiver::Function(function), Message::ExecuteAsFunction(args)) => {
                function.call(&args).map(Reply::Value)
            }
            (receiver, message) => Err(BridgeError::capability_mismatch(
                receiver.name(),
                message.name(),
            )),
        }
    }

    pub fn read_element(&self, receiver: &mut Receiver, index: usize) -> Result<Scalar, BridgeError> {
        match self.send(receiver, Message::ReadElement(index))? {
            Reply::Element(value) => Ok(value),
            other => Err(unexpected(other)),
        }
    }

    pub fn write_element(
        &self,
        receiver: &mut Receiver,
        index: usize,
        value: Scalar,
    ) -> Result<(), BridgeError> {
        self.send(receiver, Message::WriteElement(index, value))
            .map(|_| ())
    }

    pub fn get_size(&self, receiver: &mut Receiver) -> Result<usize, BridgeError> {
        match self.send(receiver, Message::GetSize)? {
            Reply::Size(size) => Ok(size),
            other => Err(unexpected(other)),
        }
    }

    pub fn convert_to_pointer(&self, receiver: &mut Receiver) -> Result<usize, BridgeError> {
        match self.send(receiver, Message::ConvertToPointer)? {
            Reply::Pointer(address) => Ok(address),
            other => Err(unexpected(other)),
        }
    }

    pub fn execute(
        &self,
        receiver: &mut Receiver,
        args: Vec<ForeignValue>,
    ) -> Result<ForeignValue, BridgeError> {
        match self.send(receiver, Message::ExecuteAsFunction(args))? {
            Reply::Value(value) => Ok(value),
            other => Err(unexpected(other)),
        }
    }

    /// Map an address coming back from foreign code to its receiver.
    pub fn resolve(&self, address: usize) -> Result<Receiver, BridgeError> {
        let Some(mirror) = self.registry.object_for(address) else {
            return Err(BridgeError::unknown_address(address, self.registry.len()));
        };
        Ok(match mirror {
            MirrorRef::Null => Receiver::Pointer(MirrorRef::Null),
            MirrorRef::Object(target) => match target.clone().into_any().downcast::<ForeignFunction>() {
                Ok(function) => Receiver::Function(function),
                Err(_) => Receiver::Pointer(MirrorRef::Object(target)),
            },
        })
    }

    /// Run a foreign call with `args` converted to addresses.
    ///
    /// Vector arguments promoted for the call have their leases ended when
    /// the call returns, fails, or panics; native content is copied back.
    pub fn call_native<R, F>(&self, args: &mut [Receiver], body: F) -> Result<R, BridgeError>
    where
        F: FnOnce(&[usize]) -> R,
    {
        let mut scope = ForeignCallScope {
            args,
            leased: Vec::new(),
        };
        let mut addresses = Vec::with_capacity(scope.args.len());
        for i in 0..scope.args.len() {
            let was_promoted = match &scope.args[i] {
                Receiver::Vector(vector) => vector.is_promoted(),
                _ => true,
            };
            addresses.push(self.to_pointer(&mut scope.args[i])?);
            if !was_promoted {
                scope.leased.push(i);
            }
        }
        log::debug!("foreign call with {} arguments", addresses.len());
        Ok(body(&addresses))
    }

    fn to_pointer(&self, receiver: &mut Receiver) -> Result<usize, BridgeError> {
        match receiver {
            Receiver::Vector(vector) => {
                if !self.config.allows_native() {
                    return Err(BridgeError::unsupported(format!(
                        "native pointer to a {} vector in managed-only mode",
                        vector.kind()
                    )));
                }
                vector.to_native()
            }
            Receiver::Function(function) => self
                .registry
                .address_for(&MirrorRef::Object(function.clone())),
            Receiver::Pointer(mirror) => self.registry.address_for(mirror),
        }
    }
}

impl Default for Mediator {
    fn default() -> Self {
        Self::new(BridgeConfig::default())
    }
}

/// Ends the native leases taken for one foreign call.
struct ForeignCallScope<'a> {
    args: &'a mut [Receiver],
    leased: Vec<usize>,
}

impl Drop for ForeignCallScope<'_> {
    fn drop(&mut self) {
        for &i in &self.leased {
            if let Receiver::Vector(vector) = &mut self.args[i] {
                vector.release_native();
            }
        }
    }
}

fn check_index(index: usize, len: usize) -> Result<(), BridgeError> {
    if index < len {
        Ok(())
    } else {
        Err(BridgeError::index_out_of_bounds(index, len))
    }
}

fn unexpected(reply: Reply) -> BridgeError {
    BridgeError::callback_failed("mediator", format!("unexpected reply {:?}", reply))
}
