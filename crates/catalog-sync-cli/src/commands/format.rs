use catalog_sync::{LocalProviderEvent, ProviderRecord, Timestamp, VenueProvider};

const MAX_CLASS_WIDTH: usize = 30;
const MAX_PAYLOAD_WIDTH: usize = 50;

pub fn print_provider_table(providers: &[ProviderRecord], venues: &[Vec<VenueProvider>]) {
    if providers.is_empty() {
        println!("No providers registered.");
        return;
    }

    let class_width = providers
        .iter()
        .map(|p| p.local_class.chars().count())
        .max()
        .unwrap_or(0)
        .min(MAX_CLASS_WIDTH);

    for (index, provider) in providers.iter().enumerate() {
        println!(
            "{:>4}  {:<width$}  {}",
            provider.id,
            truncate(&provider.local_class, class_width),
            active_label(provider.is_active),
            width = class_width
        );

        for binding in venues.get(index).map(Vec::as_slice).unwrap_or_default() {
            println!("      {}", venue_line(binding));
        }
    }

    println!("\n{} providers", providers.len());
}

pub fn venue_line(binding: &VenueProvider) -> String {
    let last_sync = binding
        .last_sync_date
        .map(format_date)
        .unwrap_or_else(|| "never synced".to_owned());
    format!(
        "venue provider {} -> venue {} ({}), {}, {}",
        binding.id,
        binding.venue_id,
        binding.venue_id_at_offer_provider,
        active_label(binding.is_active),
        last_sync
    )
}

pub fn print_event_table(events: &[LocalProviderEvent]) {
    if events.is_empty() {
        println!("No events recorded.");
        return;
    }

    for event in events {
        let payload = event.payload.as_deref().unwrap_or("");
        println!(
            "{}  {:<13}  {}",
            format_date(event.date),
            event.kind.as_str(),
            truncate(payload, MAX_PAYLOAD_WIDTH)
        );
    }
}

pub fn format_date(date: Timestamp) -> String {
    date.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn active_label(is_active: bool) -> &'static str {
    if is_active { "active" } else { "inactive" }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_owned()
    } else {
        let truncated: String = s.chars().take(max_len.saturating_sub(1)).collect();
        format!("{truncated}…")
    }
}
