//! Broadcasting a single named identity over BLE.
//!
//! Advertising is an opaque capability with start/stop semantics. Every
//! adapter walks the same state machine:
//!
//! ```text
//! Off ──prepare──▶ Ready ──start──▶ Advertising ──stop──▶ Stopped
//!                                        ▲                   │
//!                                        └──────start────────┘
//! ```
//!
//! Any state may drop back to `Off` on shutdown.

use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{BleMockError, Result};

#[cfg(feature = "bluetooth")]
pub use bluez::BluerAdvertiser;

/// Device Information service (0x180A), advertised for discoverability.
pub const DEVICE_INFORMATION_SERVICE: Uuid =
    Uuid::from_u128(0x0000_180a_0000_1000_8000_0080_5f9b_34fb);

/// Longest local name carried in legacy advertising data, in bytes.
pub const MAX_ADVERTISED_NAME_BYTES: usize = 20;

/// Size of a legacy advertising data block.
pub const ADVERTISING_DATA_LEN: usize = 31;

const TOOL_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle of an advertiser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdvertiserState {
    /// Radio not initialized.
    Off,
    /// Radio powered and idle.
    Ready,
    /// Broadcasting an identity.
    Advertising,
    /// Broadcast ended; can start again.
    Stopped,
}

impl AdvertiserState {
    /// Whether `next` is reachable from this state in one step.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Off, Self::Ready)
                | (Self::Ready | Self::Stopped, Self::Advertising)
                | (Self::Advertising, Self::Stopped)
                | (_, Self::Off)
        )
    }

    /// Moves to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`BleMockError::InvalidTransition`] for illegal moves.
    pub fn transition(self, next: Self) -> Result<Self> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(BleMockError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

/// Something that can broadcast one named identity at a time.
#[allow(async_fn_in_trait)]
pub trait Advertiser {
    /// Brings the radio up.
    ///
    /// # Errors
    ///
    /// Returns [`BleMockError::PrerequisiteMissing`] if the platform tools or
    /// adapter are unavailable.
    async fn prepare(&mut self) -> Result<()>;

    /// Starts broadcasting `name`, replacing any current broadcast.
    ///
    /// # Errors
    ///
    /// Returns [`BleMockError::AdvertisingFailed`] if the platform refuses,
    /// or [`BleMockError::InvalidTransition`] if not prepared.
    async fn start(&mut self, name: &str) -> Result<()>;

    /// Stops broadcasting. A no-op unless advertising.
    ///
    /// # Errors
    ///
    /// Returns [`BleMockError::AdvertisingFailed`] if the platform refuses.
    async fn stop(&mut self) -> Result<()>;

    /// Current lifecycle state.
    fn state(&self) -> AdvertiserState;
}

/// Builds legacy advertising data: LE General Discoverable flags followed by
/// the Complete Local Name, zero padded.
///
/// Returns the data block and the number of significant bytes.
#[must_use]
pub fn advertising_payload(name: &str) -> ([u8; ADVERTISING_DATA_LEN], usize) {
    let name = &name.as_bytes()[..name.len().min(MAX_ADVERTISED_NAME_BYTES)];
    let mut data = [0u8; ADVERTISING_DATA_LEN];

    data[..3].copy_from_slice(&[0x02, 0x01, 0x06]);
    // name.len() <= 20, so the length byte cannot overflow
    #[allow(clippy::cast_possible_truncation)]
    let name_field_len = name.len() as u8 + 1;
    data[3] = name_field_len;
    data[4] = 0x09;
    data[5..5 + name.len()].copy_from_slice(name);

    (data, 5 + name.len())
}

/// Runs a Bluetooth tool, bounded by a fixed timeout.
async fn run_tool(program: &str, args: &[&str]) -> Result<String> {
    debug!(program, ?args, "Running Bluetooth tool");
    let output = tokio::time::timeout(TOOL_TIMEOUT, Command::new(program).args(args).output())
        .await
        .map_err(|_| BleMockError::AdvertisingFailed(format!("{program} timed out")))?
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BleMockError::PrerequisiteMissing(format!("{program} not found"))
            } else {
                BleMockError::AdvertisingFailed(format!("{program}: {e}"))
            }
        })?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(BleMockError::AdvertisingFailed(format!(
            "{program} {} exited with {}",
            args.join(" "),
            output.status
        )))
    }
}

/// Makes sure the BlueZ controller is powered.
async fn ensure_powered() -> Result<()> {
    let show = run_tool("bluetoothctl", &["show"]).await?;
    if !show.contains("Powered: yes") {
        warn!("Bluetooth is off, powering on");
        run_tool("bluetoothctl", &["power", "on"]).await?;
    }
    Ok(())
}

/// Advertises through `btmgmt`, the BlueZ management tool.
#[derive(Debug)]
pub struct BtmgmtAdvertiser {
    state: AdvertiserState,
}

impl BtmgmtAdvertiser {
    /// Creates an advertiser in the `Off` state.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AdvertiserState::Off,
        }
    }
}

impl Default for BtmgmtAdvertiser {
    fn default() -> Self {
        Self::new()
    }
}

impl Advertiser for BtmgmtAdvertiser {
    async fn prepare(&mut self) -> Result<()> {
        ensure_powered().await?;
        self.state = self.state.transition(AdvertiserState::Ready)?;
        Ok(())
    }

    async fn start(&mut self, name: &str) -> Result<()> {
        self.stop().await?;
        let next = self.state.transition(AdvertiserState::Advertising)?;

        run_tool("btmgmt", &["name", name]).await?;
        run_tool("btmgmt", &["power", "on"]).await?;
        run_tool("btmgmt", &["discov", "yes"]).await?;
        run_tool("btmgmt", &["advertising", "on"]).await?;

        self.state = next;
        info!(name, "Advertising via btmgmt");
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if self.state != AdvertiserState::Advertising {
            return Ok(());
        }
        run_tool("btmgmt", &["advertising", "off"]).await?;
        self.state = self.state.transition(AdvertiserState::Stopped)?;
        Ok(())
    }

    fn state(&self) -> AdvertiserState {
        self.state
    }
}

/// Advertises by writing raw HCI commands with `hcitool`/`hciconfig`.
#[derive(Debug)]
pub struct HcitoolAdvertiser {
    hci_device: String,
    state: AdvertiserState,
}

impl HcitoolAdvertiser {
    /// Creates an advertiser for the given controller, e.g. `hci0`.
    pub fn new(hci_device: impl Into<String>) -> Self {
        Self {
            hci_device: hci_device.into(),
            state: AdvertiserState::Off,
        }
    }

    /// Arguments of the LE Set Advertising Data command for `name`.
    #[must_use]
    pub fn set_advertising_data_args(&self, name: &str) -> Vec<String> {
        let (data, significant) = advertising_payload(name);
        let mut args = vec![
            "-i".to_string(),
            self.hci_device.clone(),
            "cmd".to_string(),
            "0x08".to_string(),
            "0x0008".to_string(),
            format!("{significant:02x}"),
        ];
        args.extend(data.iter().map(|b| format!("{b:02x}")));
        args
    }
}

impl Advertiser for HcitoolAdvertiser {
    async fn prepare(&mut self) -> Result<()> {
        ensure_powered().await?;
        self.state = self.state.transition(AdvertiserState::Ready)?;
        Ok(())
    }

    async fn start(&mut self, name: &str) -> Result<()> {
        self.stop().await?;
        let next = self.state.transition(AdvertiserState::Advertising)?;

        // A controller that was never advertising rejects noleadv; ignore it.
        let _ = run_tool("hciconfig", &[self.hci_device.as_str(), "noleadv"]).await;

        let args = self.set_advertising_data_args(name);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        run_tool("hcitool", &args).await?;
        run_tool("hciconfig", &[self.hci_device.as_str(), "leadv", "0"]).await?;

        self.state = next;
        info!(name, hci = %self.hci_device, "Advertising via hcitool");
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if self.state != AdvertiserState::Advertising {
            return Ok(());
        }
        run_tool("hciconfig", &[self.hci_device.as_str(), "noleadv"]).await?;
        self.state = self.state.transition(AdvertiserState::Stopped)?;
        Ok(())
    }

    fn state(&self) -> AdvertiserState {
        self.state
    }
}

/// Tries `primary` first and falls back to `secondary` when it fails.
#[derive(Debug)]
pub struct FallbackAdvertiser<P, S> {
    primary: P,
    secondary: S,
    state: AdvertiserState,
}

impl<P: Advertiser, S: Advertiser> FallbackAdvertiser<P, S> {
    /// Combines two advertisers.
    pub const fn new(primary: P, secondary: S) -> Self {
        Self {
            primary,
            secondary,
            state: AdvertiserState::Off,
        }
    }

    /// The preferred advertiser.
    pub const fn primary(&self) -> &P {
        &self.primary
    }

    /// The fallback advertiser.
    pub const fn secondary(&self) -> &S {
        &self.secondary
    }
}

impl FallbackAdvertiser<BtmgmtAdvertiser, HcitoolAdvertiser> {
    /// btmgmt first, legacy hcitool second.
    pub fn linux(hci_device: impl Into<String>) -> Self {
        Self::new(BtmgmtAdvertiser::new(), HcitoolAdvertiser::new(hci_device))
    }
}

impl<P: Advertiser, S: Advertiser> Advertiser for FallbackAdvertiser<P, S> {
    async fn prepare(&mut self) -> Result<()> {
        let primary = self.primary.prepare().await;
        let secondary = self.secondary.prepare().await;
        if let (Err(e), Err(_)) = (&primary, &secondary) {
            return Err(BleMockError::PrerequisiteMissing(e.to_string()));
        }
        self.state = self.state.transition(AdvertiserState::Ready)?;
        Ok(())
    }

    async fn start(&mut self, name: &str) -> Result<()> {
        self.stop().await?;
        let next = self.state.transition(AdvertiserState::Advertising)?;

        match self.primary.start(name).await {
            Ok(()) => {}
            Err(primary_err) => {
                warn!(error = %primary_err, "Primary advertiser failed, trying fallback");
                self.secondary.start(name).await?;
            }
        }
        self.state = next;
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if self.state != AdvertiserState::Advertising {
            return Ok(());
        }
        if let Err(e) = self.primary.stop().await {
            debug!(error = %e, "Primary advertiser stop failed");
        }
        if let Err(e) = self.secondary.stop().await {
            debug!(error = %e, "Fallback advertiser stop failed");
        }
        self.state = self.state.transition(AdvertiserState::Stopped)?;
        Ok(())
    }

    fn state(&self) -> AdvertiserState {
        self.state
    }
}

#[cfg(feature = "bluetooth")]
mod bluez {
    use bluer::adv::{Advertisement, AdvertisementHandle, Type};
    use bluer::{Adapter, Session};
    use tracing::info;

    use super::{Advertiser, AdvertiserState, DEVICE_INFORMATION_SERVICE};
    use crate::error::{BleMockError, Result};

    fn failed(e: bluer::Error) -> BleMockError {
        BleMockError::AdvertisingFailed(e.to_string())
    }

    /// Advertises through the BlueZ LE advertising manager.
    pub struct BluerAdvertiser {
        _session: Session,
        adapter: Adapter,
        handle: Option<AdvertisementHandle>,
        state: AdvertiserState,
    }

    impl BluerAdvertiser {
        /// Connects to BlueZ and selects the default adapter.
        ///
        /// # Errors
        ///
        /// Returns [`BleMockError::PrerequisiteMissing`] if BlueZ is
        /// unreachable or has no adapter.
        pub async fn connect() -> Result<Self> {
            let unavailable =
                |e: bluer::Error| BleMockError::PrerequisiteMissing(format!("Bluetooth: {e}"));
            let session = Session::new().await.map_err(unavailable)?;
            let adapter = session.default_adapter().await.map_err(unavailable)?;
            Ok(Self {
                _session: session,
                adapter,
                handle: None,
                state: AdvertiserState::Off,
            })
        }
    }

    impl Advertiser for BluerAdvertiser {
        async fn prepare(&mut self) -> Result<()> {
            self.adapter.set_powered(true).await.map_err(|e| {
                BleMockError::PrerequisiteMissing(format!("cannot power adapter: {e}"))
            })?;
            self.state = self.state.transition(AdvertiserState::Ready)?;
            Ok(())
        }

        async fn start(&mut self, name: &str) -> Result<()> {
            self.stop().await?;
            let next = self.state.transition(AdvertiserState::Advertising)?;

            let advertisement = Advertisement {
                advertisement_type: Type::Peripheral,
                service_uuids: [DEVICE_INFORMATION_SERVICE].into_iter().collect(),
                local_name: Some(name.to_string()),
                discoverable: Some(true),
                ..Default::default()
            };
            self.handle = Some(self.adapter.advertise(advertisement).await.map_err(failed)?);

            self.state = next;
            info!(name, adapter = self.adapter.name(), "Advertising via BlueZ");
            Ok(())
        }

        async fn stop(&mut self) -> Result<()> {
            if self.state != AdvertiserState::Advertising {
                return Ok(());
            }
            // Dropping the handle unregisters the advertisement.
            self.handle.take();
            self.state = self.state.transition(AdvertiserState::Stopped)?;
            Ok(())
        }

        fn state(&self) -> AdvertiserState {
            self.state
        }
    }
}
