//! Client tools built on the remote call surface

use anyhow::{Context, Result, bail};
use common::RemoteUsb;
use protocol::{DeviceDescriptor, DeviceList, RetVal};
use std::io::Write;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

/// Apple vendor id
pub const APPLE_VENDOR_ID: u16 = 0x05ac;

/// Product ids of Apple devices in recovery (0x1280..=0x1283) or DFU (0x1227) mode
pub const RECOVERY_PRODUCT_IDS: [u16; 5] = [0x1280, 0x1281, 0x1282, 0x1283, 0x1227];

pub fn is_recovery_device(desc: &DeviceDescriptor) -> bool {
    desc.vendor_id == APPLE_VENDOR_ID && RECOVERY_PRODUCT_IDS.contains(&desc.product_id)
}

async fn init<S>(usb: &mut RemoteUsb<S>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if usb.init().await.context("Init failed")? != RetVal::Success {
        bail!("Server could not initialize its USB library");
    }
    Ok(())
}

/// Print the server's devices and the ids of the first one
pub async fn list<S, W>(usb: &mut RemoteUsb<S>, out: &mut W) -> Result<DeviceList>
where
    S: AsyncRead + AsyncWrite + Unpin,
    W: Write,
{
    init(usb).await?;

    let devices = usb.list_devices().await.context("ListDevices failed")?;
    writeln!(out, "{} device(s)", devices.len())?;
    for (i, dev) in devices.iter().enumerate() {
        writeln!(
            out,
            "[{}] bus {:03} address {:03} configurations {} (session {})",
            i, dev.bus_number, dev.device_address, dev.num_configurations, dev.session_id
        )?;
    }

    if let Some(first) = devices.first() {
        let (retval, desc) = usb
            .device_descriptor(first)
            .await
            .context("GetDescriptor failed")?;
        if retval.is_success() {
            writeln!(out, "idVendor:  {:04x}", desc.vendor_id)?;
            writeln!(out, "idProduct: {:04x}", desc.product_id)?;
        } else {
            warn!("Descriptor of the first device is unavailable");
        }
    }

    usb.exit().await?;
    Ok(devices)
}

/// Look for an Apple device in recovery or DFU mode
///
/// Stops at the first descriptor that cannot be read. Returns the vendor and
/// product id of the device found.
pub async fn find_idevice<S, W>(usb: &mut RemoteUsb<S>, out: &mut W) -> Result<Option<(u16, u16)>>
where
    S: AsyncRead + AsyncWrite + Unpin,
    W: Write,
{
    init(usb).await?;

    let devices = usb.list_devices().await.context("ListDevices failed")?;
    let mut found = None;
    for dev in &devices {
        let (retval, desc) = usb
            .device_descriptor(dev)
            .await
            .context("GetDescriptor failed")?;
        if !retval.is_success() {
            debug!("Descriptor of session {} unavailable, stopping", dev.session_id);
            break;
        }
        if is_recovery_device(&desc) {
            found = Some((desc.vendor_id, desc.product_id));
            break;
        }
    }

    match found {
        Some((vid, pid)) => writeln!(
            out,
            "[*] Found device in recovery mode ({:04x}:{:04x})",
            vid, pid
        )?,
        None => writeln!(out, "[*] No recovery device found")?,
    }

    usb.exit().await?;
    Ok(found)
}

/// Run the whole call sequence against the first device
pub async fn demo<S, W>(usb: &mut RemoteUsb<S>, interface: u8, out: &mut W) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    W: Write,
{
    init(usb).await?;
    writeln!(out, "Init: ok")?;

    let devices = usb.list_devices().await?;
    writeln!(out, "ListDevices: {} device(s)", devices.len())?;
    let Some(first) = devices.first().copied() else {
        usb.exit().await?;
        bail!("No devices to work with");
    };

    let (retval, desc) = usb.device_descriptor(&first).await?;
    writeln!(
        out,
        "GetDescriptor: {:?} ({:04x}:{:04x})",
        retval, desc.vendor_id, desc.product_id
    )?;

    let (retval, handle) = usb.open(&first).await?;
    writeln!(out, "Open: {:?}", retval)?;
    if retval.is_success() {
        writeln!(
            out,
            "ClaimInterface({}): {:?}",
            interface,
            usb.claim_interface(interface).await?
        )?;
        writeln!(
            out,
            "ReleaseInterface({}): {:?}",
            interface,
            usb.release_interface(interface).await?
        )?;
        usb.close().await?;
        writeln!(
            out,
            "Close: bus {} address {}",
            handle.dev.bus_number, handle.dev.device_address
        )?;
    }

    usb.exit().await?;
    writeln!(out, "Exit")?;
    Ok(())
}
