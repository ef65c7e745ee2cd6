//! Launchpad: fragment templating, list rendering and polling for the task
//! launcher and its admin screens.

pub mod api;
pub mod binder;
pub mod config;
pub mod form;
pub mod fragment;
pub mod list;
pub mod markup;
pub mod poll;
pub mod record;
pub mod route;
pub mod view;

pub use api::{ApiClient, ApiError, Backend, Table};
pub use config::AppConfig;
pub use fragment::{FragmentCache, FragmentError};
pub use record::Record;
pub use route::{Route, RouteState};
pub use view::{AppContext, View, ViewError, dispatch};
