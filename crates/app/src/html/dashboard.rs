/// Dashboard with both feeds and the narration caption. It polls `/status`
/// and fetches `/latest_audio` whenever `audio_id` changes.
pub(crate) const INDEX_HTML: &str = r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="UTF-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1.0" />
  <title>Nemo Explorer</title>
  <style>
    body { margin: 0; background: #050b16; color: #e2e8f0; font-family: ui-sans-serif, system-ui, sans-serif; }
    header { padding: 12px 20px; font-size: 1.4rem; font-weight: 600; letter-spacing: 0.05em; }
    main { display: grid; grid-template-columns: repeat(auto-fit, minmax(320px, 1fr)); gap: 16px; padding: 0 20px; }
    figure { margin: 0; background: #0a1628; border-radius: 8px; overflow: hidden; }
    figure img { display: block; width: 100%; background: #000; min-height: 240px; }
    figcaption { padding: 6px 10px; font-size: 0.85rem; text-transform: uppercase; color: #38bdf8; }
    #caption { margin: 20px; padding: 14px 18px; background: #13233d; border-radius: 8px; font-size: 1.25rem; min-height: 1.5em; }
    #unmute { margin: 0 20px 20px; padding: 8px 14px; border: 0; border-radius: 6px; background: #38bdf8; color: #050b16; cursor: pointer; }
  </style>
</head>
<body>
  <header>NEMO EXPLORER</header>
  <main>
    <figure>
      <img src="/feed_front" alt="front camera" />
      <figcaption>Front</figcaption>
    </figure>
    <figure>
      <img src="/feed_rear" alt="rear camera" />
      <figcaption>Rear</figcaption>
    </figure>
  </main>
  <div id="caption">System Initializing...</div>
  <button id="unmute" type="button">Enable voice</button>
  <audio id="voice"></audio>
  <script>
    const captionEl = document.getElementById("caption");
    const voice = document.getElementById("voice");
    const unmute = document.getElementById("unmute");
    let lastAudioId = 0;
    let audioEnabled = false;

    unmute.addEventListener("click", () => {
      audioEnabled = true;
      unmute.remove();
    });

    async function poll() {
      try {
        const res = await fetch("/status", { cache: "no-store" });
        if (res.ok) {
          const status = await res.json();
          captionEl.textContent = status.caption;
          if (status.audio_id > lastAudioId) {
            lastAudioId = status.audio_id;
            if (audioEnabled) {
              voice.src = "/latest_audio?v=" + status.audio_id;
              voice.play().catch(() => {});
            }
          }
        }
      } catch (err) {
        captionEl.textContent = "Connection lost...";
      }
      setTimeout(poll, 500);
    }
    poll();
  </script>
</body>
</html>
"#;
