//! Mock card demos

use anyhow::{Context, ensure};
use colored::Colorize;
use phonon_card::cert::MOCK_CA_PUBLIC_KEY;
use phonon_card::{
    CardConfig, CardPairing, CurrencyType, Denomination, KeyIndex, MockCard, Phonon, PhononCard,
    PhononFilter, guard,
};
use tracing::info;

/// Select, initialize, pair and unlock a fresh mock card
fn ready_card(name: &str, pin: &str) -> anyhow::Result<PhononCard<MockCard>> {
    let config = CardConfig::new().with_ca_public_key(MOCK_CA_PUBLIC_KEY.to_vec());
    let mut card = PhononCard::with_config(MockCard::new()?, config);

    card.select().with_context(|| format!("{name}: select"))?;
    card.init(pin).with_context(|| format!("{name}: init"))?;
    let pairing = card.pair().with_context(|| format!("{name}: pair"))?;
    card.open_secure_channel()
        .with_context(|| format!("{name}: open secure channel"))?;
    card.verify_pin(pin)
        .with_context(|| format!("{name}: verify PIN"))?;

    println!(
        "{} {name} ready (pairing slot {})",
        "\u{1F512}".green(),
        pairing.index
    );
    Ok(card)
}

fn print_phonons(name: &str, phonons: &[Phonon]) {
    println!("\n{}", format!("{name} holds {} phonon(s)", phonons.len()).bold());
    for phonon in phonons {
        println!("  {phonon}");
    }
}

/// Pair two mock cards and move `count` phonons from the first to the second
pub fn demo_pair_command(count: u16, pin: &str) -> anyhow::Result<()> {
    let mut sender = ready_card("sender", pin)?;
    let mut receiver = ready_card("receiver", pin)?;

    let mut minted: Vec<KeyIndex> = Vec::with_capacity(usize::from(count));
    for i in 0..count {
        let (index, _) = sender.create_phonon().context("create phonon")?;
        let currency = if i % 2 == 0 {
            CurrencyType::BITCOIN
        } else {
            CurrencyType::ETHEREUM
        };
        let base = u8::try_from(i % 9 + 1)?;
        let phonon = Phonon::new(currency, Denomination::new(base, 3));
        sender
            .set_descriptor(index, &phonon)
            .context("set descriptor")?;
        minted.push(index);
    }
    info!(count, "phonons minted");
    print_phonons("sender", &sender.list_phonons(PhononFilter::default())?);

    let sent = guard(|| {
        let mut flow = CardPairing::new(&mut sender, &mut receiver);
        flow.run()?;
        println!("\n{}", "\u{1F91D} Cards paired".green().bold());
        flow.transfer_phonons(minted)
    })
    .context("card pairing and transfer")?;
    println!("{}", format!("\u{1F4E6} {sent} packet(s) delivered").green());

    let left = sender.list_phonons(PhononFilter::default())?;
    let received = receiver.list_phonons(PhononFilter::default())?;
    print_phonons("sender", &left);
    print_phonons("receiver", &received);

    ensure!(left.is_empty(), "sender still holds phonons");
    ensure!(
        received.len() == usize::from(count),
        "receiver holds {} phonons, expected {count}",
        received.len()
    );
    println!("\n{}", "\u{2705} Transfer complete".green().bold());
    Ok(())
}
