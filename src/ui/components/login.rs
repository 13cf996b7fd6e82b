use eframe::egui;

/// Returns the trimmed username once the form is submitted.
pub fn render(ui: &mut egui::Ui, input: &mut String, notice: Option<&str>) -> Option<String> {
    let mut submit = false;

    ui.vertical_centered(|ui| {
        ui.heading("P2P Chat");
        ui.add_space(12.0);
        ui.label("Username");
        let response = ui.add(
            egui::TextEdit::singleline(input).hint_text("Enter a unique username"),
        );
        if response.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter)) {
            submit = true;
        }
        if ui.button("Join Chat").clicked() {
            submit = true;
        }
        if let Some(notice) = notice {
            ui.colored_label(egui::Color32::RED, notice);
        }
    });

    let name = input.trim();
    if submit && !name.is_empty() {
        let name = name.to_string();
        input.clear();
        return Some(name);
    }
    None
}
