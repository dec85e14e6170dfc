use anyhow::Result;
use pollen_core::AppEvent;
use pollen_core::transfer::save_received_file;
use pollen_core::transfer::utils::{format_bytes, format_transfer_speed};
use qrcode::QrCode;
use qrcode::render::unicode;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{error, warn};

/// Progress is printed in steps of this many percent
const PROGRESS_STEP: u32 = 10;

/// Prints session events and saves received files
pub struct Reporter {
    download_dir: PathBuf,
    last_step: HashMap<String, u32>,
}

impl Reporter {
    pub fn new(download_dir: PathBuf) -> Self {
        Self {
            download_dir,
            last_step: HashMap::new(),
        }
    }

    pub async fn handle(&mut self, event: &AppEvent) {
        match event {
            AppEvent::Connected { remote_id } => println!("Connected to {}", remote_id),
            AppEvent::Disconnected => println!("Disconnected"),
            AppEvent::TransferStarted { meta, direction } => {
                self.last_step.remove(&meta.name);
                let verb = if direction.is_sending() {
                    "Sending"
                } else {
                    "Receiving"
                };
                println!("{} {} ({})", verb, meta.name, format_bytes(meta.size));
            }
            AppEvent::TransferProgress {
                file_name,
                fraction,
                bytes_done,
                speed_bps,
                ..
            } => {
                if let Some(percent) = self.progress_step(file_name, *fraction) {
                    let elapsed = if *speed_bps > 0.0 {
                        *bytes_done as f64 / speed_bps
                    } else {
                        0.0
                    };
                    println!(
                        "  {} {:>3}% {}",
                        file_name,
                        percent,
                        format_transfer_speed(*bytes_done, elapsed)
                    );
                }
            }
            AppEvent::TransferCompleted {
                payload, meta, ..
            } => {
                self.last_step.remove(&meta.name);
                match payload {
                    Some(file) => match save_received_file(&self.download_dir, file).await {
                        Ok(path) => println!("Saved {} to {}", meta.name, path.display()),
                        Err(e) => error!("Failed to save {}: {}", meta.name, e),
                    },
                    None => println!("Sent {}", meta.name),
                }
            }
            AppEvent::SizeMismatch { meta, received } => warn!(
                "{} declared {} bytes but {} arrived",
                meta.name, meta.size, received
            ),
            AppEvent::Error(msg) => eprintln!("[ERROR] {}", msg),
        }
    }

    /// Percent to print for `fraction`, if it reached a new step
    fn progress_step(&mut self, file_name: &str, fraction: f64) -> Option<u32> {
        let percent = (fraction * 100.0).floor() as u32;
        let step = percent / PROGRESS_STEP;
        let last = self.last_step.get(file_name).copied();
        if last.is_some_and(|last| step <= last) {
            return None;
        }
        self.last_step.insert(file_name.to_string(), step);
        Some(percent)
    }
}

/// Render `text` as a terminal QR code
pub fn render_qr(text: &str) -> Result<String> {
    let code = QrCode::new(text.as_bytes())?;
    Ok(code
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .build())
}
