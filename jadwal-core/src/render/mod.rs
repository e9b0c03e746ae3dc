//! Presentation surfaces fed from cached preference state: the persistent
//! panel and the home-screen widgets. Renderers never fail outward; bad or
//! missing data shows up as placeholders or a fallback layout.

pub mod panel;
pub mod time;
pub mod widget;

pub use panel::{render_panel, static_panel};
pub use time::{format_display_time, format_display_time_in, sanitize, EMPTY_TIME, PLACEHOLDER};
pub use widget::{
    update_all_widgets, RenderSummary, WidgetId, WidgetLayout, WidgetProvider, WidgetView,
};
