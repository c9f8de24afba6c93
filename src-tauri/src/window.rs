use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use tauri::webview::{NewWindowResponse, PageLoadEvent};
use tauri::{AppHandle, Url, WebviewUrl, WebviewWindow, WebviewWindowBuilder};
use tauri_plugin_opener::OpenerExt;
use tokio::sync::watch;

use crate::error::{LauncherError, Result};
use crate::launcher::WindowHost;
use crate::navigation::{navigation_decision, Navigation};

pub const MAIN_WINDOW: &str = "main";
pub const DEFAULT_LOADING_PAGE: &str = "_load.html";

const PAGE_LOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Creates the single application window on the bundled loading page.
/// Links leaving the backend, in place or in a new window, are handed to the
/// system browser.
pub fn create_main_window(app: &AppHandle, backend_origin: String) -> tauri::Result<TauriWindow> {
    let (loaded_tx, loaded_rx) = watch::channel(None);
    let navigation_handle = app.clone();
    let navigation_origin = backend_origin.clone();
    let new_window_handle = app.clone();

    let window = WebviewWindowBuilder::new(
        app,
        MAIN_WINDOW,
        WebviewUrl::App(DEFAULT_LOADING_PAGE.into()),
    )
    .title("Endless Key")
    .inner_size(1024.0, 768.0)
    .center()
    .visible(false)
    .on_page_load(move |_, payload| {
        if let PageLoadEvent::Finished = payload.event() {
            debug!("Page loaded: {}", payload.url());
            loaded_tx.send_replace(Some(payload.url().clone()));
        }
    })
    .on_navigation(move |url| stays_in_app(&navigation_handle, url, &navigation_origin))
    .on_new_window(move |url, _features| {
        if stays_in_app(&new_window_handle, &url, &backend_origin) {
            NewWindowResponse::Allow
        } else {
            NewWindowResponse::Deny
        }
    })
    .build()?;

    window.maximize()?;
    window.show()?;
    Ok(TauriWindow {
        window,
        loaded: loaded_rx,
    })
}

/// `false` means the URL went to the system browser instead.
fn stays_in_app(app: &AppHandle, url: &Url, backend_origin: &str) -> bool {
    if is_bundled_page(url) {
        return true;
    }
    match navigation_decision(url.as_str(), backend_origin) {
        Navigation::Allow => true,
        Navigation::OpenExternal => {
            info!("Opening {url} in the default browser");
            if let Err(e) = app.opener().open_url(url.as_str(), None::<&str>) {
                warn!("Cannot open {url}: {e}");
            }
            false
        }
    }
}

// Assets served by tauri itself: tauri://localhost or http://tauri.localhost on Windows
fn is_bundled_page(url: &Url) -> bool {
    url.scheme() == "tauri" || url.host_str() == Some("tauri.localhost")
}

pub struct TauriWindow {
    window: WebviewWindow,
    /// Last page that finished loading.
    loaded: watch::Receiver<Option<Url>>,
}

impl TauriWindow {
    fn run_script(&self, script: &str) {
        if let Err(e) = self.window.eval(script) {
            warn!("Cannot run {script}: {e}");
        }
    }

    async fn wait_for_load(&self, done: impl FnMut(&Option<Url>) -> bool) {
        let mut loaded = self.loaded.clone();
        match tokio::time::timeout(PAGE_LOAD_TIMEOUT, loaded.wait_for(done)).await {
            Ok(Ok(_)) => {}
            Ok(Err(_)) => warn!("Window closed before the loading page finished"),
            Err(_) => warn!("Loading page still not ready after {PAGE_LOAD_TIMEOUT:?}"),
        }
    }
}

#[async_trait]
impl WindowHost for TauriWindow {
    async fn show_loading(&self, page: &Path) -> Result<()> {
        if page.is_relative() {
            debug!("Bundled loading page already requested");
            self.wait_for_load(|url| url.as_ref().is_some_and(is_bundled_page))
                .await;
            return Ok(());
        }
        let url = Url::from_file_path(page)
            .map_err(|_| LauncherError::Window(format!("not a file path: {}", page.display())))?;
        self.window
            .navigate(url)
            .map_err(|e| LauncherError::Window(e.to_string()))?;
        self.wait_for_load(|url| url.as_ref().is_some_and(|u| u.scheme() == "file"))
            .await;
        Ok(())
    }

    fn navigate(&self, url: &str) -> Result<()> {
        let url = Url::parse(url).map_err(|e| LauncherError::Window(e.to_string()))?;
        self.window
            .navigate(url)
            .map_err(|e| LauncherError::Window(e.to_string()))
    }

    fn show_retry(&self) {
        self.run_script("show_retry()");
    }

    fn show_error(&self) {
        self.run_script("show_error()");
    }

    fn signal_first_launch(&self) {
        self.run_script("firstLaunch()");
    }

    fn clear_cache(&self) {
        if let Err(e) = self.window.clear_all_browsing_data() {
            warn!("Cannot clear cached session data: {e}");
        }
    }
}
