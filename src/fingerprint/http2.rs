//! HTTP/2 fingerprint configuration (SETTINGS frame, window update, pseudo-header order).

use std::fmt::Write as _;

/// SETTINGS identifiers as they appear in the Akamai fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingId {
    HeaderTableSize = 1,
    EnablePush = 2,
    MaxConcurrentStreams = 3,
    InitialWindowSize = 4,
    MaxFrameSize = 5,
    MaxHeaderListSize = 6,
}

/// Pseudo-header ordering for HTTP/2 fingerprinting.
///
/// Different browsers send pseudo-headers in different orders.
/// This order is visible in the Akamai HTTP/2 fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PseudoHeaderOrder {
    /// Chrome order: :method, :authority, :scheme, :path (m,a,s,p)
    #[default]
    Chrome,
    /// Firefox order: :method, :path, :authority, :scheme (m,p,a,s)
    Firefox,
}

impl PseudoHeaderOrder {
    /// Get the Akamai fingerprint string for this order.
    pub fn akamai_string(&self) -> &'static str {
        match self {
            Self::Chrome => "m,a,s,p",
            Self::Firefox => "m,p,a,s",
        }
    }
}

/// HTTP/2 SETTINGS for fingerprinting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Http2Settings {
    pub header_table_size: u32,
    pub enable_push: bool,
    /// Only sent when `Some`.
    pub max_concurrent_streams: Option<u32>,
    pub initial_window_size: u32,
    pub max_frame_size: u32,
    /// Only sent when `Some`.
    pub max_header_list_size: Option<u32>,
    /// Total connection-level window (initial 65535 + WINDOW_UPDATE increment).
    pub connection_window_size: u32,
    /// Order the SETTINGS entries appear in.
    pub settings_order: &'static [SettingId],
}

/// HTTP/2 default connection window before any WINDOW_UPDATE.
const DEFAULT_CONNECTION_WINDOW: u32 = 65_535;

impl Default for Http2Settings {
    fn default() -> Self {
        Self::chrome()
    }
}

impl Http2Settings {
    /// Chrome 131.
    pub fn chrome() -> Self {
        Self {
            header_table_size: 65_536,
            enable_push: false,
            max_concurrent_streams: None,
            initial_window_size: 6_291_456,
            max_frame_size: 16_384,
            max_header_list_size: Some(262_144),
            connection_window_size: 15_728_640,
            settings_order: &[
                SettingId::HeaderTableSize,
                SettingId::EnablePush,
                SettingId::InitialWindowSize,
                SettingId::MaxHeaderListSize,
            ],
        }
    }

    /// Firefox 133.
    pub fn firefox() -> Self {
        Self {
            header_table_size: 65_536,
            enable_push: false,
            max_concurrent_streams: None,
            initial_window_size: 131_072,
            max_frame_size: 16_384,
            max_header_list_size: None,
            connection_window_size: 12_582_912,
            settings_order: &[
                SettingId::HeaderTableSize,
                SettingId::EnablePush,
                SettingId::InitialWindowSize,
                SettingId::MaxFrameSize,
            ],
        }
    }

    /// Settings used without impersonation: the h2 crate's defaults.
    pub fn plain() -> Self {
        Self {
            header_table_size: 4_096,
            enable_push: false,
            max_concurrent_streams: None,
            initial_window_size: 65_535,
            max_frame_size: 16_384,
            max_header_list_size: None,
            connection_window_size: DEFAULT_CONNECTION_WINDOW,
            settings_order: &[SettingId::EnablePush],
        }
    }

    fn value(&self, id: SettingId) -> Option<u32> {
        match id {
            SettingId::HeaderTableSize => Some(self.header_table_size),
            SettingId::EnablePush => Some(self.enable_push as u32),
            SettingId::MaxConcurrentStreams => self.max_concurrent_streams,
            SettingId::InitialWindowSize => Some(self.initial_window_size),
            SettingId::MaxFrameSize => Some(self.max_frame_size),
            SettingId::MaxHeaderListSize => self.max_header_list_size,
        }
    }

    /// WINDOW_UPDATE increment sent on stream 0 after the preface.
    pub fn window_update_increment(&self) -> u32 {
        self.connection_window_size
            .saturating_sub(DEFAULT_CONNECTION_WINDOW)
    }

    /// Akamai fingerprint: `settings|window_update|priority|pseudo_order`.
    pub fn akamai_fingerprint(&self, pseudo_order: PseudoHeaderOrder) -> String {
        let mut out = String::new();
        let mut first = true;
        for id in self.settings_order {
            if let Some(v) = self.value(*id) {
                if !first {
                    out.push(';');
                }
                first = false;
                let _ = write!(out, "{}:{}", *id as u8, v);
            }
        }
        let _ = write!(
            out,
            "|{}|0|{}",
            self.window_update_increment(),
            pseudo_order.akamai_string()
        );
        out
    }
}
