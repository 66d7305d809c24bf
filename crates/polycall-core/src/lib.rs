#![forbid(unsafe_code)]
//! `polycall-core`: a language-agnostic FFI runtime core. Central
//! registry of exposed functions and language bridges, a canonical
//! type model with bidirectional value marshalling, a cross-language
//! memory manager, a hierarchical protocol state machine, and a
//! fixed-header wire framer, all under a zero-trust security posture.
//!
//! Concrete bridge bodies for any specific language runtime, transports,
//! and cryptography are external collaborators; this crate models only
//! their contracts.

pub mod config;
pub mod context;
pub mod error;
pub mod ffi;
pub mod fsm;
pub mod memory;
pub mod perf;
pub mod pubsub;
pub mod registry;
pub mod session;
pub mod types;
pub mod wire;

pub use config::{CoreConfig, IsolationLevel};
pub use context::CoreContext;
pub use error::{CoreError, ErrorKind, ErrorRecord, PolyResult, Severity};
pub use ffi::{AsyncLanguageBridge, BridgeCapabilities, CallCache, ExposedFunction, FfiRegistry, FunctionFlags, LanguageBridge, PermissionGate};
pub use fsm::{InheritancePolicy, Relationship, StateId, StateMachine, StateMachineBuilder, TransitionKind};
pub use memory::{MemoryBridge, Permission, RegionDescriptor, ShareFlags};
pub use perf::{ConversionCache, PerfCallCache, TraceEntry, TraceRing};
pub use pubsub::{PubSub, PubSubLimits, SubscriberCallback};
pub use registry::ServiceRegistry;
pub use session::{Cancellation, SessionConfig, SessionContext, SessionState, TransportEndpoint};
pub use types::{DescriptorRef, FieldDescriptor, FunctionSignature, ParamDescriptor, TypeCodec, TypeDescriptor, TypeDetail, TypeRegistry, Value, ValueKind};
pub use wire::{Frame, FrameCodec, Header, MessageFlags, MessageType};
