use std::path::PathBuf;

use eframe::egui;

use crate::session::media::{IMAGE_EXTENSIONS, VIDEO_EXTENSIONS};

#[derive(Default)]
pub struct InputActions {
    pub text: Option<String>,
    pub file: Option<PathBuf>,
}

pub fn render(ui: &mut egui::Ui, input_text: &mut String, upload_progress: Option<u8>) -> InputActions {
    let mut actions = InputActions::default();

    if let Some(percent) = upload_progress {
        ui.add(
            egui::ProgressBar::new(f32::from(percent) / 100.0)
                .text(format!("Uploading {percent}%")),
        );
    }

    let mut send = false;
    ui.horizontal(|ui| {
        let response = ui.text_edit_singleline(input_text);
        if ui.button("Send").clicked() {
            send = true;
        }

        if response.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter)) {
            send = true;
        }

        let idle = upload_progress.is_none();
        if ui
            .add_enabled(idle, egui::Button::new("Image / Video"))
            .clicked()
        {
            actions.file = pick_media_file();
        }
    });

    if send && !input_text.trim().is_empty() {
        actions.text = Some(std::mem::take(input_text));
    }

    actions
}

fn pick_media_file() -> Option<PathBuf> {
    let all: Vec<&str> = IMAGE_EXTENSIONS
        .iter()
        .chain(VIDEO_EXTENSIONS)
        .copied()
        .collect();
    rfd::FileDialog::new()
        .add_filter("Images and videos", &all)
        .add_filter("Images", IMAGE_EXTENSIONS)
        .add_filter("Videos", VIDEO_EXTENSIONS)
        .pick_file()
}
