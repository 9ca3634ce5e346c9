fn main() {
    repprof_e2e_tests::main();
}
