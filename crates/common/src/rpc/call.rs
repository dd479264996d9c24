//! The call value passed through the dispatcher

use super::ops::{
    ClaimInterface, Close, Exit, GetDescriptor, Inert, Init, ListDevices, Open, OpenWithVidPid,
    ReleaseInterface,
};
use protocol::FunctionId;

/// Inputs and outputs of one remote call
///
/// The variant is the function id. A call is owned by its caller for the
/// duration of one dispatch and can be reused for the next one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Init(Init),
    ListDevices(ListDevices),
    GetDescriptor(GetDescriptor),
    OpenWithVidPid(OpenWithVidPid),
    Close(Close),
    Open(Open),
    ClaimInterface(ClaimInterface),
    ReleaseInterface(ReleaseInterface),
    Exit(Exit),
    Inert(Inert),
}

impl Call {
    /// A call for `function` with default inputs, as built by the server loop
    pub fn empty(function: FunctionId) -> Self {
        match function {
            FunctionId::Init => Call::Init(Init),
            FunctionId::ListDevices => Call::ListDevices(ListDevices::default()),
            FunctionId::GetDescriptor => Call::GetDescriptor(GetDescriptor::default()),
            FunctionId::OpenWithVidPid => Call::OpenWithVidPid(OpenWithVidPid::default()),
            FunctionId::Close => Call::Close(Close),
            FunctionId::Open => Call::Open(Open::default()),
            FunctionId::ClaimInterface => Call::ClaimInterface(ClaimInterface::default()),
            FunctionId::ReleaseInterface => Call::ReleaseInterface(ReleaseInterface::default()),
            FunctionId::Exit => Call::Exit(Exit),
            FunctionId::GetConfiguration
            | FunctionId::SetConfiguration
            | FunctionId::SetInterfaceAltSetting
            | FunctionId::ResetDevice
            | FunctionId::ControlTransfer
            | FunctionId::BulkTransfer
            | FunctionId::ClearHalt
            | FunctionId::GetStringDescriptorAscii => Call::Inert(Inert { function }),
        }
    }

    /// The function id this call is tagged with
    pub fn function(&self) -> FunctionId {
        match self {
            Call::Init(_) => FunctionId::Init,
            Call::ListDevices(_) => FunctionId::ListDevices,
            Call::GetDescriptor(_) => FunctionId::GetDescriptor,
            Call::OpenWithVidPid(_) => FunctionId::OpenWithVidPid,
            Call::Close(_) => FunctionId::Close,
            Call::Open(_) => FunctionId::Open,
            Call::ClaimInterface(_) => FunctionId::ClaimInterface,
            Call::ReleaseInterface(_) => FunctionId::ReleaseInterface,
            Call::Exit(_) => FunctionId::Exit,
            Call::Inert(op) => op.function,
        }
    }
}

macro_rules! impl_from_op {
    ($($op:ident),* $(,)?) => {
        $(
            impl From<$op> for Call {
                fn from(op: $op) -> Self {
                    Call::$op(op)
                }
            }
        )*
    };
}

impl_from_op!(
    Init,
    ListDevices,
    GetDescriptor,
    OpenWithVidPid,
    Close,
    Open,
    ClaimInterface,
    ReleaseInterface,
    Exit,
);
