//! Wi-Fi network conditions.

use std::fmt;

use vane_core::ConnContext;

use crate::item::{RuleItem, write_values};

/// The `wifi_ssid` condition group.
pub struct WifiSsidItem {
    ssids: Vec<String>,
}

impl WifiSsidItem {
    pub fn new(ssids: &[String]) -> Self {
        Self {
            ssids: ssids.to_vec(),
        }
    }
}

impl RuleItem for WifiSsidItem {
    fn matches(&self, ctx: &mut ConnContext) -> bool {
        ctx.wifi
            .as_ref()
            .is_some_and(|wifi| self.ssids.iter().any(|s| *s == wifi.ssid))
    }
}

impl fmt::Display for WifiSsidItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_values(f, "wifi_ssid", &self.ssids)
    }
}

/// The `wifi_bssid` condition group.
pub struct WifiBssidItem {
    bssids: Vec<String>,
}

impl WifiBssidItem {
    pub fn new(bssids: &[String]) -> Self {
        Self {
            bssids: bssids.to_vec(),
        }
    }
}

impl RuleItem for WifiBssidItem {
    fn matches(&self, ctx: &mut ConnContext) -> bool {
        ctx.wifi
            .as_ref()
            .is_some_and(|wifi| self.bssids.iter().any(|b| *b == wifi.bssid))
    }
}

impl fmt::Display for WifiBssidItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_values(f, "wifi_bssid", &self.bssids)
    }
}

#[cfg(test)]
mod tests {
    use vane_core::WifiState;

    use super::*;

    #[test]
    fn ssid_requires_wifi_state() {
        let item = WifiSsidItem::new(&["home".to_string()]);
        let mut ctx = ConnContext::new();
        assert!(!item.matches(&mut ctx));
        ctx.wifi = Some(WifiState {
            ssid: "home".to_string(),
            bssid: "aa:bb:cc:dd:ee:ff".to_string(),
        });
        assert!(item.matches(&mut ctx));
    }

    #[test]
    fn bssid_membership() {
        let item = WifiBssidItem::new(&["aa:bb:cc:dd:ee:ff".to_string()]);
        let mut ctx = ConnContext::new();
        ctx.wifi = Some(WifiState {
            ssid: "office".to_string(),
            bssid: "11:22:33:44:55:66".to_string(),
        });
        assert!(!item.matches(&mut ctx));
        ctx.wifi.as_mut().unwrap().bssid = "aa:bb:cc:dd:ee:ff".to_string();
        assert!(item.matches(&mut ctx));
    }
}
