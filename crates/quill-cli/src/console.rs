//! A delivery adapter that prints to the terminal instead of a chat.
//!
//! Permanent messages are printed in full. Preview frames are printed as a
//! single dimmed line, and only when previews are enabled, since a stream
//! produces many of them.

use async_trait::async_trait;
use chrono::Local;
use crossterm::style::Stylize;
use quill_core::{ChatTarget, Delivery, DeliveryError, MessageId, SurfaceId, TextFormat};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

const PREVIEW_WIDTH: usize = 72;

enum Sink {
    Stdout,
    /// Uncolored lines, kept for inspection.
    Buffer(Mutex<Vec<String>>),
}

pub struct ConsoleDelivery {
    next_id: AtomicI64,
    show_previews: bool,
    /// Last frame per surface, so a stall refresh does not print twice.
    /// A send to the same chat ends those surfaces and drops their frames.
    last_frames: Mutex<HashMap<SurfaceId, (ChatTarget, String)>>,
    sink: Sink,
}

impl ConsoleDelivery {
    pub fn new(show_previews: bool) -> Self {
        Self::with_sink(show_previews, Sink::Stdout)
    }

    /// Collect output in memory instead of printing it.
    pub fn buffered(show_previews: bool) -> Self {
        Self::with_sink(show_previews, Sink::Buffer(Mutex::new(Vec::new())))
    }

    fn with_sink(show_previews: bool, sink: Sink) -> Self {
        Self {
            next_id: AtomicI64::new(1),
            show_previews,
            last_frames: Mutex::new(HashMap::new()),
            sink,
        }
    }

    /// Lines written so far. Empty unless built with [`ConsoleDelivery::buffered`].
    pub fn lines(&self) -> Vec<String> {
        match &self.sink {
            Sink::Buffer(lines) => lines.lock().map(|l| l.clone()).unwrap_or_default(),
            Sink::Stdout => Vec::new(),
        }
    }

    fn forget_frames(&self, target: &ChatTarget) {
        if let Ok(mut frames) = self.last_frames.lock() {
            frames.retain(|_, (frame_target, _)| frame_target != target);
        }
    }

    fn emit(&self, plain: String, styled: impl FnOnce(&str) -> String) {
        match &self.sink {
            Sink::Stdout => println!("{}", styled(&plain)),
            Sink::Buffer(lines) => {
                if let Ok(mut lines) = lines.lock() {
                    lines.push(plain);
                }
            }
        }
    }
}

fn timestamp() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

fn describe_target(target: &ChatTarget) -> String {
    match target.thread_id {
        Some(thread) => format!("chat {}/{}", target.chat_id, thread),
        None => format!("chat {}", target.chat_id),
    }
}

fn format_tag(format: TextFormat) -> &'static str {
    match format {
        TextFormat::Rich => "rich",
        TextFormat::Plain => "plain",
    }
}

/// Last non-empty line of a frame, cut to the preview width.
pub fn preview_line(text: &str) -> String {
    let line = text
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or_default()
        .trim();
    if line.chars().count() <= PREVIEW_WIDTH {
        return line.to_string();
    }
    let tail: Vec<char> = line.chars().collect();
    let start = tail.len() - (PREVIEW_WIDTH - 1);
    format!("…{}", tail[start..].iter().collect::<String>())
}

#[async_trait]
impl Delivery for ConsoleDelivery {
    async fn send_message(
        &self,
        target: &ChatTarget,
        text: &str,
        format: TextFormat,
    ) -> Result<MessageId, DeliveryError> {
        self.forget_frames(target);
        let id = MessageId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let header = format!(
            "[{}] #{} {} ({})",
            timestamp(),
            id.0,
            describe_target(target),
            format_tag(format)
        );
        self.emit(format!("{header}\n{text}"), |_| {
            format!("{}\n{}", header.clone().bold().green(), text)
        });
        Ok(id)
    }

    async fn update_preview(
        &self,
        target: &ChatTarget,
        surface: SurfaceId,
        text: &str,
        _format: TextFormat,
    ) -> Result<(), DeliveryError> {
        if !self.show_previews {
            return Ok(());
        }
        {
            let mut frames = self
                .last_frames
                .lock()
                .map_err(|_| DeliveryError::Transport("preview state poisoned".to_string()))?;
            if frames.get(&surface).is_some_and(|(_, last)| last == text) {
                return Ok(());
            }
            frames.insert(surface, (*target, text.to_string()));
        }
        let line = format!(
            "[{}] ~{} {} {}",
            timestamp(),
            surface,
            describe_target(target),
            preview_line(text)
        );
        self.emit(line, |plain| plain.to_string().dim().to_string());
        Ok(())
    }

    async fn delete_message(
        &self,
        target: &ChatTarget,
        message_id: MessageId,
    ) -> Result<(), DeliveryError> {
        self.forget_frames(target);
        let line = format!(
            "[{}] deleted #{} in {}",
            timestamp(),
            message_id.0,
            describe_target(target)
        );
        self.emit(line, |plain| plain.to_string().yellow().to_string());
        Ok(())
    }
}
