mod app;

use eframe::NativeOptions;

fn main() {
    tracing_subscriber::fmt::init();
    let options = NativeOptions::default();
    let title = format!("Marbling Inspector {}", env!("MARBLING_VERSION"));
    if let Err(e) = eframe::run_native(
        &title,
        options,
        Box::new(|_cc| {
            Ok::<_, Box<dyn std::error::Error + Send + Sync>>(Box::new(app::UiApp::load()))
        }),
    ) {
        eprintln!("Application stopped with error: {e}");
    }
}
