use std::path::{Path, PathBuf};
use std::sync::Arc;

use ratatui::layout::Rect;
use teamchat_core::{
    Attachment, ChatError, Config, HttpTransport, LifecycleController, ProgressiveRenderer,
    Transport, TurnEvent,
};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub input_mode: InputMode,
    pub controller: LifecycleController,
    pub endpoint: String,

    // Message input
    pub input: String,
    pub cursor: usize,
    pub pending_attachment: Option<Attachment>,
    pub max_attachment_bytes: u64,
    pub notice: Option<String>,

    // Attach-file prompt
    pub show_attach_input: bool,
    pub attach_input: String,
    pub attach_cursor: usize,

    // Chat view
    pub chat_scroll: u16,
    pub chat_height: u16, // Height of chat area for scroll calculations
    pub chat_width: u16,  // Width of chat area for wrap calculations
    pub chat_lines: u16,  // Wrapped line count from the last render
    pub follow: bool,     // Keep the view pinned to the end of the conversation
    pub chat_area: Option<Rect>,

    // Animation state
    pub animation_frame: u8, // 0-2 for ellipsis animation
}

impl App {
    pub fn new(config: &Config) -> anyhow::Result<(Self, mpsc::UnboundedReceiver<TurnEvent>)> {
        let transport: Arc<dyn Transport> = match config.request_timeout() {
            Some(timeout) => Arc::new(HttpTransport::with_timeout(&config.endpoint, timeout)?),
            None => Arc::new(HttpTransport::new(&config.endpoint)),
        };
        let renderer = ProgressiveRenderer::new(config.pacing());
        let (controller, turn_rx) = LifecycleController::new(transport, renderer);
        log::info!("using chat endpoint {}", config.endpoint);

        Ok((Self::with_controller(controller, config), turn_rx))
    }

    pub fn with_controller(controller: LifecycleController, config: &Config) -> Self {
        Self {
            should_quit: false,
            input_mode: InputMode::Editing,
            controller,
            endpoint: config.endpoint.clone(),

            input: String::new(),
            cursor: 0,
            pending_attachment: None,
            max_attachment_bytes: config.max_attachment_bytes,
            notice: None,

            show_attach_input: false,
            attach_input: String::new(),
            attach_cursor: 0,

            chat_scroll: 0,
            chat_height: 0,
            chat_width: 0,
            chat_lines: 0,
            follow: true,
            chat_area: None,

            animation_frame: 0,
        }
    }

    /// Send the input (and pending attachment) as a new turn
    pub fn submit(&mut self) {
        if !self.controller.can_send() {
            return;
        }
        if self.input.trim().is_empty() && self.pending_attachment.is_none() {
            return;
        }

        let text = std::mem::take(&mut self.input);
        let attachment = self.pending_attachment.take();
        if self.controller.start(&text, attachment) {
            self.cursor = 0;
            self.notice = None;
            self.follow = true;
        }
    }

    pub fn stop(&mut self) {
        if self.controller.stop() {
            self.notice = Some("Stopped".to_string());
        }
    }

    pub fn new_chat(&mut self) {
        self.controller.new_chat();
        self.pending_attachment = None;
        self.chat_scroll = 0;
        self.follow = true;
        self.notice = Some("Started a new chat".to_string());
    }

    pub fn open_attach_prompt(&mut self) {
        self.show_attach_input = true;
        self.attach_input.clear();
        self.attach_cursor = 0;
    }

    pub fn close_attach_prompt(&mut self) {
        self.show_attach_input = false;
        self.attach_input.clear();
        self.attach_cursor = 0;
    }

    /// Load the file named in the attach prompt. Oversized or unreadable
    /// files are refused here, so they can never be sent.
    pub fn confirm_attachment(&mut self) {
        let raw = self.attach_input.trim().to_string();
        self.close_attach_prompt();
        if raw.is_empty() {
            return;
        }

        let path = expand_home(&raw);
        match Attachment::load(&path, self.max_attachment_bytes) {
            Ok(attachment) => {
                self.notice = match attachment.contents() {
                    Ok(_) => Some(format!("Attached {}", attachment.name())),
                    Err(e) => Some(format!("Attached with note: {}", e)),
                };
                self.pending_attachment = Some(attachment);
            }
            Err(e @ ChatError::AttachmentTooLarge { .. }) => {
                self.notice = Some(format!("File too large: {}", e));
            }
            Err(e) => {
                self.notice = Some(e.to_string());
            }
        }
    }

    pub fn clear_attachment(&mut self) {
        if let Some(attachment) = self.pending_attachment.take() {
            self.notice = Some(format!("Removed {}", attachment.name()));
        }
    }

    pub fn on_turn_event(&mut self, event: TurnEvent) {
        self.controller.apply(event);
        if self.controller.take_scroll_request() {
            self.follow = true;
        }
    }

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        if self.controller.is_waiting() {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    fn max_scroll(&self) -> u16 {
        self.chat_lines.saturating_sub(self.chat_height)
    }

    pub fn scroll_up(&mut self, lines: u16) {
        self.follow = false;
        self.chat_scroll = self.chat_scroll.min(self.max_scroll()).saturating_sub(lines);
    }

    pub fn scroll_down(&mut self, lines: u16) {
        self.chat_scroll = (self.chat_scroll + lines).min(self.max_scroll());
        if self.chat_scroll >= self.max_scroll() {
            self.follow = true;
        }
    }

    pub fn scroll_to_top(&mut self) {
        self.follow = false;
        self.chat_scroll = 0;
    }

    pub fn scroll_to_bottom(&mut self) {
        self.follow = true;
        self.chat_scroll = self.max_scroll();
    }

    /// Record the rendered chat size; pins the view to the end when following
    pub fn update_chat_metrics(&mut self, total_lines: u16, height: u16, width: u16) {
        self.chat_lines = total_lines;
        self.chat_height = height;
        self.chat_width = width;
        if self.follow {
            self.chat_scroll = self.max_scroll();
        } else {
            self.chat_scroll = self.chat_scroll.min(self.max_scroll());
        }
    }
}

fn expand_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    Path::new(raw).to_path_buf()
}
