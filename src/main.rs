fn main() -> anyhow::Result<()> {
    launch_watch::run()
}
