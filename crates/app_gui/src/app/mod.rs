mod persist;
mod thresholds;

use eframe::{App, Frame, egui};
use image::GrayImage;
use marbling_core::{
    FatMeasurement, HsvThresholds, ScanOptions, export_fat_csv, fat::mask_for_file,
    measure_batch, scan_folder,
};
use rfd::FileDialog;
use std::path::{Path, PathBuf};
use std::time::Instant;

const PREVIEW_SIZE: f32 = 320.0;

#[derive(Default)]
pub struct UiApp {
    images: Vec<PathBuf>,
    rows: Vec<FatMeasurement>,
    thresholds: HsvThresholds,
    selected: Option<usize>,
    mask: Option<egui::TextureHandle>,
    status: String,
    settings_path: Option<PathBuf>,
}

impl UiApp {
    /// Starts with thresholds from the previous session, if any.
    pub fn load() -> Self {
        let settings_path = persist::settings_path();
        let thresholds = settings_path
            .as_deref()
            .filter(|p| p.exists())
            .and_then(|p| match persist::load_thresholds(p) {
                Ok(t) => Some(t),
                Err(e) => {
                    tracing::warn!("{e:#}");
                    None
                }
            })
            .unwrap_or_default();
        Self {
            thresholds,
            settings_path,
            ..Self::default()
        }
    }

    fn set_images(&mut self, images: Vec<PathBuf>) {
        self.images = images;
        self.selected = None;
        self.mask = None;
        self.recompute();
    }

    /// Re-measure every loaded image with the current thresholds.
    fn recompute(&mut self) {
        if self.images.is_empty() {
            self.rows.clear();
            return;
        }
        let start = Instant::now();
        self.rows = measure_batch(&self.images, &self.thresholds);
        let total = self.rows.len();
        let mean = self.rows.iter().map(|r| r.fat_percent).sum::<f64>() / total as f64;
        self.status = format!(
            "Measured {total} images, mean fat {mean:.2}% ({:.1?})",
            start.elapsed()
        );
    }

    fn save_settings(&self) {
        if let Some(path) = &self.settings_path
            && let Err(e) = persist::save_thresholds(path, &self.thresholds)
        {
            tracing::warn!("{e:#}");
        }
    }

    fn select(&mut self, ctx: &egui::Context, index: usize) {
        self.selected = Some(index);
        self.mask = None;
        let Some(path) = self.images.get(index).cloned() else {
            return;
        };
        match mask_for_file(&path, &self.thresholds) {
            Ok(mask) => self.mask = Some(mask_texture(ctx, &path, &mask)),
            Err(e) => {
                tracing::warn!("{e:#}");
                self.status = format!("Cannot show mask: {e}");
            }
        }
    }

    fn render_top_bar(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            if ui.button("Select images...").clicked()
                && let Some(files) = FileDialog::new()
                    .add_filter("Images", &["jpg", "jpeg", "png"])
                    .pick_files()
            {
                self.set_images(files);
            }

            if ui.button("Open folder...").clicked()
                && let Some(dir) = FileDialog::new().set_directory(".").pick_folder()
            {
                match scan_folder(&dir, ScanOptions { recursive: false }) {
                    Ok(files) if files.is_empty() => {
                        self.status = format!("No images in {}", dir.display());
                    }
                    Ok(files) => self.set_images(files),
                    Err(e) => self.status = format!("Cannot scan folder: {e}"),
                }
            }

            let can_export = !self.rows.is_empty();
            if ui
                .add_enabled(can_export, egui::Button::new("Save CSV"))
                .clicked()
                && let Some(path) = FileDialog::new()
                    .add_filter("CSV", &["csv"])
                    .set_file_name("marbling_fat.csv")
                    .save_file()
            {
                if let Err(e) = export_fat_csv(&self.rows, &path) {
                    self.status = format!("Export failed: {e}");
                } else {
                    self.status = format!("CSV exported: {}", path.display());
                }
            }

            if !self.status.is_empty() {
                ui.label(&self.status);
            }
        });
    }

    fn render_results(&mut self, ctx: &egui::Context, ui: &mut egui::Ui) {
        if self.rows.is_empty() {
            ui.heading("No images loaded");
            return;
        }

        let mut clicked = None;
        egui::ScrollArea::vertical()
            .auto_shrink([false; 2])
            .show(ui, |ui| {
                egui::Grid::new("fat-results")
                    .num_columns(2)
                    .striped(true)
                    .show(ui, |ui| {
                        ui.strong("Image");
                        ui.strong("Fat (%)");
                        ui.end_row();
                        for (i, row) in self.rows.iter().enumerate() {
                            let selected = self.selected == Some(i);
                            if ui
                                .selectable_label(selected, file_label(&row.file))
                                .clicked()
                            {
                                clicked = Some(i);
                            }
                            ui.label(format!("{:.2}", row.fat_percent));
                            ui.end_row();
                        }
                    });
            });

        if let Some(i) = clicked {
            self.select(ctx, i);
        }
    }

    fn render_preview(&self, ui: &mut egui::Ui) {
        ui.heading("Mask");
        let Some(tex) = &self.mask else {
            ui.label("Click an image to show its fat mask");
            return;
        };
        let [w, h] = tex.size();
        let scale = PREVIEW_SIZE / (w.max(h).max(1) as f32);
        let desired = egui::Vec2::new(w as f32 * scale, h as f32 * scale);
        let (resp, painter) = ui.allocate_painter(desired, egui::Sense::hover());
        let uv = egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0));
        painter.image(tex.id(), uv, resp.rect, egui::Color32::WHITE);
        if let Some(row) = self.selected.and_then(|i| self.rows.get(i)) {
            ui.label(format!(
                "{}: {:.2}%",
                file_label(&row.file),
                row.fat_percent
            ));
        }
    }
}

impl App for UiApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut Frame) {
        egui::TopBottomPanel::top("top").show(ctx, |ui| self.render_top_bar(ui));

        egui::SidePanel::left("thresholds").show(ctx, |ui| {
            if self.render_threshold_panel(ui) {
                self.save_settings();
                self.recompute();
                if let Some(i) = self.selected {
                    self.select(ctx, i);
                }
            }
        });

        egui::SidePanel::right("preview")
            .min_width(PREVIEW_SIZE + 16.0)
            .show(ctx, |ui| self.render_preview(ui));

        egui::CentralPanel::default().show(ctx, |ui| self.render_results(ctx, ui));
    }
}

fn mask_texture(ctx: &egui::Context, path: &Path, mask: &GrayImage) -> egui::TextureHandle {
    let (w, h) = mask.dimensions();
    let color = egui::ColorImage::from_gray([w as usize, h as usize], mask.as_raw());
    let name = format!("mask:{}", path.display());
    ctx.load_texture(name, color, egui::TextureOptions::LINEAR)
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("/images/rib_01.jpg", "rib_01.jpg")]
    #[case("loin.png", "loin.png")]
    #[case("/", "/")]
    fn file_label_prefers_file_name(#[case] path: &str, #[case] expected: &str) {
        assert_eq!(file_label(Path::new(path)), expected);
    }

    #[test]
    fn recompute_without_images_clears_rows() {
        let mut app = UiApp {
            rows: vec![FatMeasurement {
                file: PathBuf::from("stale.jpg"),
                fat_percent: 5.0,
            }],
            ..UiApp::default()
        };
        app.recompute();
        assert!(app.rows.is_empty());
    }
}
