use log::info;
use rand::prelude::*;
use simplelog::*;
use time::macros::format_description;

use wear_ftl::config::Config as FtlConfig;
use wear_ftl::{Ftl, MemDevice};

fn report(fw: &Ftl<MemDevice>, label: &str) {
    let stats = fw.stats();
    info!(
        "{}: wear {:?}..{:?}, {} erases, {} gc passes, {} migrations, WA {:.3}",
        label,
        fw.min_wear(),
        fw.max_wear(),
        stats.erases,
        stats.gc_passes,
        stats.migrations,
        stats.write_amplification()
    );
}

fn main() -> wear_ftl::Result<()> {
    let log_cfg = ConfigBuilder::new()
        .set_time_format_custom(format_description!("[hour]:[minute]:[second].[subsecond]"))
        .build();

    SimpleLogger::init(LevelFilter::Info, log_cfg).unwrap();

    let cfg = FtlConfig::default();
    cfg.log_capacity();

    let mut fw = Ftl::new(cfg.clone(), MemDevice::for_config(&cfg))?;
    let pages = cfg.page_count_per_block;
    let lbas = cfg.logical_pages();
    let mut data = vec![0u8; cfg.page_size];

    for lba in 0..lbas {
        data.fill(lba as u8);
        fw.write(&data, lba / pages, lba % pages)?;
    }
    report(&fw, "Drive preconditioned");

    let mut rng: SmallRng = SmallRng::seed_from_u64(7);

    for c in 0..4 {
        for _ in 0..lbas {
            let lba = rng.gen_range(0..lbas);
            rng.fill_bytes(&mut data);
            fw.write(&data, lba / pages, lba % pages)?;
        }
        report(&fw, &format!("Capacity {} randomly written", c));
    }

    // 90% of the writes land on 5% of the address space.
    let hot = lbas / 20;
    for c in 0..4 {
        for _ in 0..lbas {
            let lba = if rng.gen_bool(0.9) { rng.gen_range(0..hot) } else { rng.gen_range(0..lbas) };
            rng.fill_bytes(&mut data);
            fw.write(&data, lba / pages, lba % pages)?;
        }
        report(&fw, &format!("Capacity {} written with hot set", c));
    }

    fw.verify()?;
    info!("Device saw {} erases in total", fw.device().total_erases());
    Ok(())
}
