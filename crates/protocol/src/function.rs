//! Function identifiers, roles and return values
//!
//! Every exchange on the wire starts with the client sending a [`FunctionId`]
//! as a single integer. The discriminants are part of the protocol and must
//! never be renumbered; new operations are appended.

use crate::error::{ProtocolError, Result};
use std::fmt;

/// Identifies one remote operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(i32)]
pub enum FunctionId {
    Init = 0,
    ListDevices = 1,
    GetDescriptor = 2,
    OpenWithVidPid = 3,
    Close = 4,
    Open = 5,
    ClaimInterface = 6,
    ReleaseInterface = 7,
    Exit = 8,
    GetConfiguration = 9,
    SetConfiguration = 10,
    SetInterfaceAltSetting = 11,
    ResetDevice = 12,
    ControlTransfer = 13,
    BulkTransfer = 14,
    ClearHalt = 15,
    GetStringDescriptorAscii = 16,
}

impl FunctionId {
    /// Every declared function, in discriminant order
    pub const ALL: [FunctionId; 17] = [
        FunctionId::Init,
        FunctionId::ListDevices,
        FunctionId::GetDescriptor,
        FunctionId::OpenWithVidPid,
        FunctionId::Close,
        FunctionId::Open,
        FunctionId::ClaimInterface,
        FunctionId::ReleaseInterface,
        FunctionId::Exit,
        FunctionId::GetConfiguration,
        FunctionId::SetConfiguration,
        FunctionId::SetInterfaceAltSetting,
        FunctionId::ResetDevice,
        FunctionId::ControlTransfer,
        FunctionId::BulkTransfer,
        FunctionId::ClearHalt,
        FunctionId::GetStringDescriptorAscii,
    ];

    /// Wire representation
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Declared in the command set but not wired to the device library.
    ///
    /// Inert functions carry no request payload and always answer `Failure`.
    pub fn is_inert(self) -> bool {
        self >= FunctionId::GetConfiguration
    }

    pub fn name(self) -> &'static str {
        match self {
            FunctionId::Init => "init",
            FunctionId::ListDevices => "list_devices",
            FunctionId::GetDescriptor => "get_descriptor",
            FunctionId::OpenWithVidPid => "open_with_vid_pid",
            FunctionId::Close => "close",
            FunctionId::Open => "open",
            FunctionId::ClaimInterface => "claim_interface",
            FunctionId::ReleaseInterface => "release_interface",
            FunctionId::Exit => "exit",
            FunctionId::GetConfiguration => "get_configuration",
            FunctionId::SetConfiguration => "set_configuration",
            FunctionId::SetInterfaceAltSetting => "set_interface_alt_setting",
            FunctionId::ResetDevice => "reset_device",
            FunctionId::ControlTransfer => "control_transfer",
            FunctionId::BulkTransfer => "bulk_transfer",
            FunctionId::ClearHalt => "clear_halt",
            FunctionId::GetStringDescriptorAscii => "get_string_descriptor_ascii",
        }
    }
}

impl TryFrom<i32> for FunctionId {
    type Error = ProtocolError;

    fn try_from(value: i32) -> Result<Self> {
        usize::try_from(value)
            .ok()
            .and_then(|index| FunctionId::ALL.get(index).copied())
            .ok_or(ProtocolError::UnknownFunction(value))
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which half of a dispatch handler runs in this process. Never transmitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Client => f.write_str("client"),
            Role::Server => f.write_str("server"),
        }
    }
}

/// Two-valued result sentinel returned by most operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetVal {
    #[default]
    Success,
    Failure,
}

impl RetVal {
    pub const SUCCESS_CODE: i32 = 0;
    pub const FAILURE_CODE: i32 = -1;

    pub fn as_i32(self) -> i32 {
        match self {
            RetVal::Success => Self::SUCCESS_CODE,
            RetVal::Failure => Self::FAILURE_CODE,
        }
    }

    /// Zero is success; any other code (libusb error codes are negative) is failure
    pub fn from_i32(code: i32) -> Self {
        if code == Self::SUCCESS_CODE {
            RetVal::Success
        } else {
            RetVal::Failure
        }
    }

    pub fn is_success(self) -> bool {
        self == RetVal::Success
    }

    pub fn from_result<T, E>(result: &std::result::Result<T, E>) -> Self {
        if result.is_ok() {
            RetVal::Success
        } else {
            RetVal::Failure
        }
    }
}
