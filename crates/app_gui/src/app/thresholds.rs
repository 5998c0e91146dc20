//! Threshold panel: one slider per HSV bound.

use super::UiApp;
use eframe::egui;
use marbling_core::HsvThresholds;
use marbling_core::fat::HUE_MAX;

impl UiApp {
    /// Renders the HSV sliders. Returns true when any bound changed.
    pub(super) fn render_threshold_panel(&mut self, ui: &mut egui::Ui) -> bool {
        ui.heading("HSV thresholds");
        ui.add_space(8.0);

        let t = &mut self.thresholds;
        let mut changed = false;
        changed |= bound_slider(ui, "H min", &mut t.h_low, HUE_MAX);
        changed |= bound_slider(ui, "H max", &mut t.h_high, HUE_MAX);
        changed |= bound_slider(ui, "S min", &mut t.s_low, u8::MAX);
        changed |= bound_slider(ui, "S max", &mut t.s_high, u8::MAX);
        changed |= bound_slider(ui, "V min", &mut t.v_low, u8::MAX);
        changed |= bound_slider(ui, "V max", &mut t.v_high, u8::MAX);

        ui.add_space(12.0);
        if ui.button("Reset defaults").clicked() {
            self.thresholds = HsvThresholds::default();
            changed = true;
        }
        if self.thresholds.h_low > self.thresholds.h_high
            || self.thresholds.s_low > self.thresholds.s_high
            || self.thresholds.v_low > self.thresholds.v_high
        {
            ui.colored_label(egui::Color32::YELLOW, "A minimum exceeds its maximum");
        }
        changed
    }
}

fn bound_slider(ui: &mut egui::Ui, label: &str, value: &mut u8, max: u8) -> bool {
    ui.add(egui::Slider::new(value, 0..=max).text(label))
        .changed()
}
