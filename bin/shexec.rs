fn main() {
    shexec::shexec_main()
}
