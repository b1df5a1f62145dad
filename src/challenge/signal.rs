//! Handoff channel between the page and native code.
//!
//! A watcher script installed in the page re-evaluates the document on a
//! fixed interval and writes one token into `document.title`. Native code
//! only ever reads the title back and parses it with [`ChallengeSignal::parse`].

/// Challenge flavours the watcher recognises
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptchaKind {
    /// Proof-of-work lock page that solves itself, given time
    ProofOfWork,
    /// CAPTCHA hosted by the protection provider (Turnstile and friends)
    Hosted,
    /// Third-party CAPTCHA widget embedded in the page
    Alternate,
    /// "Verify you are human" interstitial without a recognised widget
    BotCheck,
}

impl CaptchaKind {
    pub fn token(&self) -> &'static str {
        match self {
            CaptchaKind::ProofOfWork => "pow_captcha",
            CaptchaKind::Hosted => "cf_captcha",
            CaptchaKind::Alternate => "re_captcha",
            CaptchaKind::BotCheck => "bot_captcha",
        }
    }

    /// Whether a person has to interact with the page
    pub fn needs_human(&self) -> bool {
        !matches!(self, CaptchaKind::ProofOfWork)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeSignal {
    Ready,
    Error,
    InProgress(CaptchaKind),
}

impl ChallengeSignal {
    /// `None` while the title still belongs to the page (watcher not yet reporting)
    pub fn parse(title: &str) -> Option<Self> {
        match title.trim() {
            "ready" => Some(ChallengeSignal::Ready),
            "error" => Some(ChallengeSignal::Error),
            "pow_captcha" => Some(ChallengeSignal::InProgress(CaptchaKind::ProofOfWork)),
            "cf_captcha" => Some(ChallengeSignal::InProgress(CaptchaKind::Hosted)),
            "re_captcha" => Some(ChallengeSignal::InProgress(CaptchaKind::Alternate)),
            "bot_captcha" => Some(ChallengeSignal::InProgress(CaptchaKind::BotCheck)),
            _ => None,
        }
    }

    pub fn token(&self) -> &'static str {
        match self {
            ChallengeSignal::Ready => "ready",
            ChallengeSignal::Error => "error",
            ChallengeSignal::InProgress(kind) => kind.token(),
        }
    }
}

/// Watcher installed in the page. Installing twice in the same document is a no-op,
/// so native code re-installs it on every poll to survive navigations.
///
/// A provider interstitial without a CAPTCHA widget usually clears by itself;
/// it is only reported as `bot_captcha` once it has been up for `grace_ms`.
pub fn watcher_script(interval_ms: u64, grace_ms: u64) -> String {
    format!(
        r#"
        (function() {{
            if (window.__challengeWatcher) {{
                return;
            }}
            function report() {{
                var text = document.body ? document.body.innerText.toLowerCase() : '';
                var signal = null;

                if (document.querySelector('#cf-error-details, .browser-outdated, #outdated')) {{
                    signal = 'error';
                }} else if (document.querySelector('#anubis_challenge, #ddg-l10n-title, #progress[data-pow], script[src*="proof-of-work"]')) {{
                    signal = 'pow_captcha';
                }} else if (document.querySelector('#turnstile-wrapper, .cf-turnstile, iframe[src*="challenges.cloudflare.com"]')) {{
                    signal = 'cf_captcha';
                }} else if (document.querySelector('.g-recaptcha, .h-captcha, iframe[src*="recaptcha"], iframe[src*="hcaptcha"]')) {{
                    signal = 're_captcha';
                }} else if (document.querySelector('#challenge-running, #challenge-stage')
                        || text.includes('checking your browser') || text.includes('verify you are human')) {{
                    if (!window.__interstitialSince) {{
                        window.__interstitialSince = Date.now();
                    }}
                    if (Date.now() - window.__interstitialSince >= {grace}) {{
                        signal = 'bot_captcha';
                    }}
                }} else if (document.readyState === 'complete') {{
                    signal = 'ready';
                }}

                if (signal !== null && document.title !== signal) {{
                    document.title = signal;
                }}
            }}
            window.__challengeWatcher = setInterval(report, {interval});
            report();
        }})();
        "#,
        interval = interval_ms,
        grace = grace_ms
    )
}

/// Hide the usual automation markers before the site inspects them
pub fn stealth_script() -> &'static str {
    r#"
        Object.defineProperty(navigator, 'webdriver', {
            get: () => undefined
        });
        if (!window.chrome) {
            window.chrome = { runtime: {} };
        }
        Object.defineProperty(navigator, 'plugins', {
            get: () => [1, 2, 3, 4, 5]
        });
        Object.defineProperty(navigator, 'languages', {
            get: () => ['en-US', 'en']
        });
    "#
}
