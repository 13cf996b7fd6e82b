use eframe::egui;

use crate::ui::state::AppState;

/// Returns a peer name when the user asked to connect.
pub fn render(ui: &mut egui::Ui, state: &mut AppState) -> Option<String> {
    let mut connect_to = None;

    ui.heading("Your Info");
    ui.separator();
    match &state.identity {
        Some(identity) => {
            ui.label(format!("Username: {identity}"));
        }
        None => {
            ui.label(egui::RichText::new("Registering...").weak());
        }
    }

    ui.separator();
    ui.label("Connect to Peer:");
    let response = ui.text_edit_singleline(&mut state.connect_input);
    let entered = response.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
    if (ui.button("Connect").clicked() || entered) && !state.connect_input.trim().is_empty() {
        connect_to = Some(state.connect_input.trim().to_string());
        state.connect_input.clear();
    }

    if let Some(peer) = &state.connection {
        ui.separator();
        ui.label("Connected to:");
        ui.horizontal(|ui| {
            ui.colored_label(egui::Color32::GREEN, "●");
            ui.label(peer.as_str());
        });
    }

    connect_to
}
