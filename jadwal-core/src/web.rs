use anyhow::Result;
use log::{debug, info, warn};
use std::sync::{Mutex, MutexGuard};

use crate::clock::Clock;
use crate::services::WebViewService;

pub const DEFAULT_QIBLA_URL: &str = "https://qiblafinder.withgoogle.com/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WebViewHandle(pub u64);

/// Installed once per page load. Routes injected fixes to the page and makes
/// the browser geolocation calls answer with the last injected fix.
pub const GEOLOCATION_SHIM: &str = r#"(function(){
  try {
    if (!window.__flutter_injected_gps_handler) {
      window.__flutter_injected_gps_handler = function(pos){
        try {
          window.__last_injected_pos = pos;
          if (window.onInjectedGeolocation) {
            try { window.onInjectedGeolocation(pos); } catch(e) {}
          }
        } catch(e) {}
      };
      if (navigator.geolocation) {
        var originalGetCurrent = navigator.geolocation.getCurrentPosition;
        navigator.geolocation.getCurrentPosition = function(success, error, options) {
          try {
            if (window.__last_injected_pos) { success(window.__last_injected_pos); return; }
          } catch(e) {}
          return originalGetCurrent.apply(navigator.geolocation, arguments);
        };
        var originalWatch = navigator.geolocation.watchPosition;
        navigator.geolocation.watchPosition = function(success, error, options) {
          try {
            if (window.__last_injected_pos) { success(window.__last_injected_pos); return 1; }
          } catch(e) {}
          return originalWatch.apply(navigator.geolocation, arguments);
        };
      }
    }
  } catch(e) {}
})();"#;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoFix {
    pub lat: f64,
    pub lon: f64,
    pub accuracy: f64,
    pub timestamp_ms: i64,
}

/// Script delivering one fix. Falls back to stashing it in
/// `window.__last_injected_pos` when the shim is not installed yet.
pub fn injection_script(fix: &GeoFix) -> String {
    let pos = format!(
        "{{coords:{{latitude:{},longitude:{},accuracy:{}}},timestamp:{}}}",
        fix.lat, fix.lon, fix.accuracy, fix.timestamp_ms
    );
    format!(
        "(function(){{ try{{ var pos={pos}; \
         if(window.__flutter_injected_gps_handler){{ window.__flutter_injected_gps_handler(pos); }} \
         else {{ window.__last_injected_pos = pos; }} \
         }}catch(e){{console.error(e)}} }})();",
        pos = pos
    )
}

/// The embedded qibla page. At most one web view is active.
#[derive(Debug, Default)]
pub struct QiblaWeb {
    active: Mutex<Option<WebViewHandle>>,
}

impl QiblaWeb {
    pub fn new() -> Self {
        Self::default()
    }

    fn active(&self) -> MutexGuard<'_, Option<WebViewHandle>> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn active_view(&self) -> Option<WebViewHandle> {
        *self.active()
    }

    /// Replaces any view that is already open.
    pub fn open<W: WebViewService + ?Sized>(&self, web: &W, url: Option<&str>) -> Result<WebViewHandle> {
        let url = url.filter(|u| !u.trim().is_empty()).unwrap_or(DEFAULT_QIBLA_URL);
        let view = web.open(url)?;
        let previous = self.active().replace(view);
        if let Some(old) = previous {
            web.close(old);
        }
        info!("Opened qibla web view {:?} at {}", view, url);
        Ok(view)
    }

    pub fn on_page_finished<W: WebViewService + ?Sized>(&self, web: &W, view: WebViewHandle) {
        if self.active_view() != Some(view) {
            debug!("Page finished on inactive view {:?}", view);
            return;
        }
        if let Err(e) = web.evaluate_javascript(view, GEOLOCATION_SHIM) {
            warn!("Failed to install geolocation shim: {}", e);
        }
    }

    /// Returns whether a script was sent. Without an active view, or without
    /// both coordinates, nothing happens.
    pub fn inject<S>(
        &self,
        services: &S,
        lat: Option<f64>,
        lon: Option<f64>,
        accuracy: Option<f64>,
        timestamp_ms: Option<i64>,
    ) -> Result<bool>
    where
        S: WebViewService + Clock + ?Sized,
    {
        let view = match self.active_view() {
            Some(view) => view,
            None => {
                debug!("No active web view, dropping location");
                return Ok(false);
            }
        };
        let (lat, lon) = match (lat, lon) {
            (Some(lat), Some(lon)) if lat.is_finite() && lon.is_finite() => (lat, lon),
            _ => return Ok(false),
        };

        let fix = GeoFix {
            lat,
            lon,
            accuracy: accuracy.filter(|a| a.is_finite()).unwrap_or(0.0),
            timestamp_ms: timestamp_ms.unwrap_or_else(|| services.now_ms()),
        };
        services.evaluate_javascript(view, &injection_script(&fix))?;
        debug!("Injected location {},{} into {:?}", lat, lon, view);
        Ok(true)
    }

    pub fn close<W: WebViewService + ?Sized>(&self, web: &W) {
        if let Some(view) = self.active().take() {
            web.close(view);
            info!("Closed qibla web view {:?}", view);
        }
    }
}
