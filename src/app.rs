use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use egui::plot::{HLine, Line, Plot, PlotPoints};
use egui::{Color32, ColorImage, TextureHandle, TextureOptions};
use image::RgbaImage;
use tracing::{debug, error, info};

use crate::assets::{caption_for, ReferenceImages, CAPTION_WAITING};
use crate::error::Result;
use crate::mouth::Status;
use crate::status_queue::StatusQueue;
use crate::utils::*;

pub const WINDOW_TITLE: &str = "Gato Detector 😺";
const REPAINT_INTERVAL: Duration = Duration::from_millis(50);

pub struct GatoDetectorApp {
    shared_state: SharedState,
    queue: Arc<StatusQueue>,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<Result<()>>>,

    references: ReferenceImages,
    threshold: f32,

    /// Status currently shown; `None` until the first one arrives.
    status: Option<Status>,
    reference_texture: Option<TextureHandle>,
    camera_texture: Option<TextureHandle>,
    shown_frame_seq: u64,
}

impl GatoDetectorApp {
    pub fn new(
        shared_state: SharedState,
        queue: Arc<StatusQueue>,
        shutdown: Arc<AtomicBool>,
        worker: JoinHandle<Result<()>>,
        references: ReferenceImages,
        threshold: f32,
    ) -> Self {
        Self {
            shared_state,
            queue,
            shutdown,
            worker: Some(worker),
            references,
            threshold,
            status: None,
            reference_texture: None,
            camera_texture: None,
            shown_frame_seq: 0,
        }
    }

    /// Takes the newest queued status; the reference image is rebuilt when it changes.
    fn poll_status(&mut self) {
        if let Some(status) = self.queue.drain_latest() {
            if self.status != Some(status) {
                debug!("Status changed to {}", status);
                self.status = Some(status);
                self.reference_texture = None;
            }
        }
    }

    fn caption(&self) -> &'static str {
        self.status.map(caption_for).unwrap_or(CAPTION_WAITING)
    }

    fn reference_panel(&mut self, ui: &mut egui::Ui) {
        ui.heading("Estado Atual:");
        ui.add_space(8.0);

        let shown = self.status.unwrap_or(Status::Sus);
        let reference = self.references.image_for(shown);
        let texture = self.reference_texture.get_or_insert_with(|| {
            ui.ctx()
                .load_texture("reference", rgba_to_color_image(&reference.rgba), TextureOptions::default())
        });

        let width = ui.available_width();
        let height = width * reference.height() as f32 / reference.width().max(1) as f32;
        ui.image(&*texture, egui::Vec2::new(width, height));

        ui.add_space(8.0);
        ui.label(egui::RichText::new(self.caption()).size(22.0).strong());
        ui.add_space(16.0);

        egui::CollapsingHeader::new("Diagnostics")
            .default_open(false)
            .show(ui, |ui| self.diagnostics(ui));
    }

    fn diagnostics(&self, ui: &mut egui::Ui) {
        let state = lock_state(&self.shared_state);

        ui.label(format!("FPS: {}", state.fps.unwrap_or(0.0)));
        let resolution = state.resolution.unwrap_or((0, 0));
        ui.label(format!("Resolution: {}x{}", resolution.0, resolution.1));

        match state.classification {
            Some(c) if c.face_found => ui.label(format!("Ratio: {:.3}", c.ratio)),
            _ => ui.label("Ratio: no face"),
        };
        ui.label(format!("Threshold: {:.2}", self.threshold));
        ui.label(format!(
            "Queue: {} ({}/{}), dropped {}",
            self.queue.policy(),
            self.queue.len(),
            self.queue.capacity(),
            self.queue.dropped()
        ));

        let points: PlotPoints = state
            .ratio_ts
            .iter()
            .map(|(ratio, ts)| [ts as f64 / 1e6, ratio as f64])
            .collect();
        let threshold = self.threshold as f64;
        Plot::new("ratio_plot")
            .height(120.0)
            .include_y(0.0)
            .include_y(threshold * 2.0)
            .allow_drag(false)
            .allow_zoom(false)
            .show(ui, |plot_ui| {
                plot_ui.line(Line::new(points).name("ratio"));
                plot_ui.hline(HLine::new(threshold).color(Color32::RED).name("threshold"));
            });

        // camera selection; the worker reopens the stream when this changes
        let Some(devices) = state.devices.clone() else {
            ui.label("No devices found.");
            return;
        };
        let mut selected_device = state.current_device.unwrap_or_default() as usize;
        drop(state);

        let selected_name = devices
            .get(selected_device)
            .cloned()
            .unwrap_or_else(|| format!("Camera {selected_device}"));
        egui::ComboBox::from_label("Camera")
            .selected_text(selected_name)
            .show_ui(ui, |ui| {
                for (i, device) in devices.iter().enumerate() {
                    ui.selectable_value(&mut selected_device, i, device);
                }
            });

        let mut state = lock_state(&self.shared_state);
        if state.current_device != Some(selected_device as u32) {
            info!("Camera {} selected", selected_device);
            state.current_device = Some(selected_device as u32);
        }
    }

    fn camera_panel(&mut self, ui: &mut egui::Ui) {
        let state = lock_state(&self.shared_state);

        if let Some(ref message) = state.worker_error {
            ui.colored_label(Color32::RED, format!("Video stopped: {message}"));
        }

        let Some(ref frame) = state.frame else {
            ui.label("Waiting for camera...");
            return;
        };

        let size = [frame.width() as usize, frame.height() as usize];
        if self.shown_frame_seq != state.frame_seq || self.camera_texture.is_none() {
            let image = ColorImage::from_rgb(size, frame.as_raw());
            match self.camera_texture {
                Some(ref mut texture) => texture.set(image, TextureOptions::default()),
                None => {
                    self.camera_texture =
                        Some(ui.ctx().load_texture("camera", image, TextureOptions::default()))
                }
            }
            self.shown_frame_seq = state.frame_seq;
        }
        drop(state);

        if let Some(ref texture) = self.camera_texture {
            // fit the panel width, keep the aspect ratio
            let width = ui.available_width();
            let height = width * size[1] as f32 / size[0].max(1) as f32;
            ui.image(texture, egui::Vec2::new(width, height));
        }
    }

    fn stop_worker(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            match worker.join() {
                Ok(Ok(())) => debug!("Video worker joined"),
                Ok(Err(e)) => debug!("Video worker had stopped: {e}"),
                Err(_) => error!("Video worker panicked"),
            }
        }
    }
}

fn rgba_to_color_image(image: &RgbaImage) -> ColorImage {
    let size = [image.width() as usize, image.height() as usize];
    ColorImage::from_rgba_unmultiplied(size, image.as_raw())
}

impl eframe::App for GatoDetectorApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll_status();

        egui::TopBottomPanel::top("top_panel").show(ctx, |ui| {
            ui.heading(WINDOW_TITLE);
        });

        // camera and reference image share the width 2:1
        let side_width = ctx.screen_rect().width() / 3.0;
        egui::SidePanel::right("reference_panel")
            .resizable(false)
            .exact_width(side_width)
            .show(ctx, |ui| {
                egui::ScrollArea::vertical().show(ui, |ui| self.reference_panel(ui));
            });

        egui::CentralPanel::default().show(ctx, |ui| self.camera_panel(ui));

        ctx.request_repaint_after(REPAINT_INTERVAL);
    }
}

impl Drop for GatoDetectorApp {
    fn drop(&mut self) {
        self.stop_worker();
    }
}
