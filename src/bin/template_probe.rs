use promptpilot::config::ResolverConfig;
use promptpilot::detector;

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: template_probe <template.png> <screenshot.png> [screenshot2.png ...]");
        eprintln!("Set PROMPTPILOT_MATCH_SCALE_DOWN to override the downscale factor.");
        std::process::exit(1);
    }

    let defaults = ResolverConfig::default();
    let scale_down = match std::env::var("PROMPTPILOT_MATCH_SCALE_DOWN") {
        Ok(raw) => match raw.parse::<u32>() {
            Ok(n) if n > 0 => n,
            _ => {
                eprintln!("Invalid PROMPTPILOT_MATCH_SCALE_DOWN: {raw:?}");
                std::process::exit(1);
            }
        },
        Err(_) => defaults.match_scale_down,
    };

    let template_path = &args[1];
    let template_img = image::open(template_path).unwrap_or_else(|e| {
        eprintln!("Failed to load template image {template_path}: {e}");
        std::process::exit(1);
    });
    println!(
        "Template: {} ({}x{})",
        template_path,
        template_img.width(),
        template_img.height()
    );

    let Some(prepared) = detector::prepare_template(&template_img, scale_down) else {
        eprintln!("Template is too small to match at 1/{scale_down} scale");
        std::process::exit(1);
    };
    println!(
        "Prepared: {}x{} grayscale at 1/{}",
        prepared.gray.width(),
        prepared.gray.height(),
        prepared.scale_down
    );
    println!("Threshold: {:.4}", defaults.match_threshold);
    println!();

    for screenshot_path in &args[2..] {
        let screenshot = match image::open(screenshot_path) {
            Ok(img) => img,
            Err(e) => {
                eprintln!("Failed to load {screenshot_path}: {e}");
                continue;
            }
        };

        match detector::find_best_match(&screenshot, &prepared) {
            Some(m) => {
                let status = if m.score >= defaults.match_threshold {
                    "MATCH"
                } else {
                    "no match"
                };
                println!(
                    "{screenshot_path}: {status} score={:.4} method={:?} center={}",
                    m.score,
                    m.method,
                    m.center()
                );
            }
            None => {
                println!("{screenshot_path}: no correlation result");
            }
        }
    }
}
