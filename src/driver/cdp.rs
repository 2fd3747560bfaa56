use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, anyhow};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chromiumoxide::Page;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::input::{DispatchKeyEventParams, DispatchKeyEventType};
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventLoadingFinished, EventResponseReceived, GetResponseBodyParams, RequestId,
};
use chrono::Utc;
use futures::StreamExt;
use rand::Rng;
use tokio::runtime::Runtime;
use tracing::{debug, warn};

use super::{Session, SessionError, TraceEntry, TraceResponse};

const FALLBACK_USER_AGENTS: [&str; 3] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
];

#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    pub chrome_executable: Option<PathBuf>,
    pub user_agent: Option<String>,
    pub stealth: bool,
    pub disable_web_security: bool,
}

#[derive(Default)]
struct TraceStore {
    order: Vec<RequestId>,
    exchanges: HashMap<RequestId, StoredExchange>,
}

struct StoredExchange {
    url: String,
    response: Option<TraceResponse>,
}

impl TraceStore {
    fn record_response(&mut self, request_id: RequestId, url: String) {
        if !self.exchanges.contains_key(&request_id) {
            self.order.push(request_id.clone());
        }
        self.exchanges
            .entry(request_id)
            .or_insert(StoredExchange {
                url,
                response: None,
            });
    }

    fn attach_body(&mut self, request_id: &RequestId, body: Vec<u8>) {
        if let Some(exchange) = self.exchanges.get_mut(request_id) {
            exchange.response = Some(TraceResponse {
                body,
                arrived_at: Utc::now(),
            });
        }
    }

    fn snapshot(&self) -> Vec<TraceEntry> {
        self.order
            .iter()
            .filter_map(|request_id| self.exchanges.get(request_id))
            .map(|exchange| TraceEntry {
                url: exchange.url.clone(),
                response: exchange.response.clone(),
            })
            .collect()
    }

    fn clear(&mut self) {
        self.order.clear();
        self.exchanges.clear();
    }
}

/// Synchronous facade over a Chrome DevTools Protocol session. The trace log
/// is fed by a background task subscribed to `Network.responseReceived` and
/// `Network.loadingFinished`; bodies are pulled with `Network.getResponseBody`
/// once loading finishes.
pub struct CdpSession {
    runtime: Runtime,
    browser: Browser,
    page: Page,
    trace: Arc<Mutex<TraceStore>>,
}

impl CdpSession {
    /// Launches a headful browser. Failure here is the one fatal setup error
    /// of a run: there is nothing to retry if no browser can be started.
    pub fn launch(options: &LaunchOptions) -> Result<Self> {
        let runtime = Runtime::new().context("failed to create tokio runtime")?;

        let mut builder = BrowserConfig::builder().with_head();
        if let Some(path) = &options.chrome_executable {
            builder = builder.chrome_executable(path);
        }

        let mut args = vec!["--disable-http2".to_string()];
        if options.stealth {
            args.push("--disable-blink-features=AutomationControlled".to_string());
            args.push("--disable-dev-shm-usage".to_string());
            args.push("--no-sandbox".to_string());
            let agent = options.user_agent.clone().unwrap_or_else(|| {
                let index = rand::thread_rng().gen_range(0..FALLBACK_USER_AGENTS.len());
                FALLBACK_USER_AGENTS[index].to_string()
            });
            args.push(format!("--user-agent={agent}"));
        }
        if options.disable_web_security {
            warn!("web security disabled for this session");
            args.push("--disable-web-security".to_string());
        }

        let config = builder
            .args(args)
            .build()
            .map_err(|err| anyhow!("invalid browser configuration: {err}"))?;

        let trace = Arc::new(Mutex::new(TraceStore::default()));
        let collector_store = trace.clone();

        let (browser, page) = runtime.block_on(async move {
            let (browser, mut handler) = Browser::launch(config)
                .await
                .context("failed to launch browser")?;

            tokio::spawn(async move {
                while let Some(event) = handler.next().await {
                    if event.is_err() {
                        break;
                    }
                }
            });

            let page = browser
                .new_page("about:blank")
                .await
                .context("failed to open initial page")?;
            page.execute(EnableParams::default())
                .await
                .context("failed to enable network tracing")?;

            let mut responses = page
                .event_listener::<EventResponseReceived>()
                .await
                .context("failed to subscribe to response events")?;
            let mut finished = page
                .event_listener::<EventLoadingFinished>()
                .await
                .context("failed to subscribe to loading events")?;

            let body_page = page.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        response = responses.next() => {
                            let Some(event) = response else { break };
                            if let Ok(mut store) = collector_store.lock() {
                                store.record_response(
                                    event.request_id.clone(),
                                    event.response.url.clone(),
                                );
                            }
                        }
                        done = finished.next() => {
                            let Some(event) = done else { break };
                            let request_id = event.request_id.clone();
                            let body = fetch_body(&body_page, &request_id).await;
                            if let (Some(bytes), Ok(mut store)) = (body, collector_store.lock()) {
                                store.attach_body(&request_id, bytes);
                            }
                        }
                    }
                }
                debug!("network event collector stopped");
            });

            Ok::<_, anyhow::Error>((browser, page))
        })?;

        Ok(Self {
            runtime,
            browser,
            page,
            trace,
        })
    }
}

async fn fetch_body(page: &Page, request_id: &RequestId) -> Option<Vec<u8>> {
    let response = page
        .execute(GetResponseBodyParams::new(request_id.clone()))
        .await
        .ok()?;
    let bytes = if response.base64_encoded {
        BASE64.decode(response.body.as_bytes()).ok()?
    } else {
        response.body.clone().into_bytes()
    };
    Some(bytes)
}

impl Session for CdpSession {
    fn navigate(&mut self, url: &str) -> Result<(), SessionError> {
        let page = self.page.clone();
        let url = url.to_string();
        self.runtime
            .block_on(async move { page.goto(url).await.map(|_| ()) })
            .map_err(|err| SessionError::Backend(err.to_string()))
    }

    fn execute_script(&mut self, js: &str) -> Result<serde_json::Value, SessionError> {
        let page = self.page.clone();
        let js = js.to_string();
        let result = self
            .runtime
            .block_on(async move { page.evaluate(js).await })
            .map_err(|err| SessionError::Script(err.to_string()))?;
        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    fn element_count(&mut self, css: &str) -> Result<usize, SessionError> {
        let js = format!(r#"document.querySelectorAll("{css}").length"#);
        match self.execute_script(&js)? {
            serde_json::Value::Number(count) => Ok(count.as_u64().unwrap_or(0) as usize),
            _ => Ok(0),
        }
    }

    fn send_key(&mut self, key: &str) -> Result<(), SessionError> {
        let virtual_key = match key {
            "ArrowRight" => 39,
            "ArrowLeft" => 37,
            _ => 0,
        };
        let page = self.page.clone();
        let key_down = DispatchKeyEventParams::builder()
            .r#type(DispatchKeyEventType::RawKeyDown)
            .key(key)
            .code(key)
            .windows_virtual_key_code(virtual_key)
            .native_virtual_key_code(virtual_key)
            .build()
            .map_err(SessionError::Backend)?;
        let key_up = DispatchKeyEventParams::builder()
            .r#type(DispatchKeyEventType::KeyUp)
            .key(key)
            .code(key)
            .windows_virtual_key_code(virtual_key)
            .native_virtual_key_code(virtual_key)
            .build()
            .map_err(SessionError::Backend)?;
        self.runtime
            .block_on(async move {
                page.execute(key_down).await?;
                page.execute(key_up).await?;
                Ok::<_, chromiumoxide::error::CdpError>(())
            })
            .map_err(|err| SessionError::Backend(err.to_string()))
    }

    fn trace_log(&mut self) -> Result<Vec<TraceEntry>, SessionError> {
        self.trace
            .lock()
            .map(|store| store.snapshot())
            .map_err(|_| SessionError::Backend("trace store poisoned".to_string()))
    }

    fn reset_trace(&mut self) -> Result<(), SessionError> {
        self.trace
            .lock()
            .map(|mut store| store.clear())
            .map_err(|_| SessionError::Backend("trace store poisoned".to_string()))
    }
}

impl Drop for CdpSession {
    fn drop(&mut self) {
        let _ = self.runtime.block_on(async {
            let _ = self.browser.close().await;
            let _ = self.browser.wait().await;
        });
    }
}
